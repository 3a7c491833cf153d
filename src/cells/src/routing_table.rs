use crate::{CellAddress, CellRoute, RouteKind, RoutingResult, RoutingTableError};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

// A poisoned map is still structurally sound; the table keeps serving.
fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// Process-wide registry of message routes. Each route kind has its own
/// index behind its own lock, so lookups of different kinds never contend.
/// Topic sets are shared out by handle and replaced on mutation, which keeps
/// the hot `find_topic_routes` path free of copies. The two singleton slots
/// behave like compare-and-set registers.
///
/// Iteration (`Display`, `routing_list`) takes each lock in turn; the
/// combined snapshot is not consistent across indexes.
#[derive(Default)]
pub struct CellRoutingTable {
    exact: Mutex<HashMap<String, Vec<CellRoute>>>,
    wellknown: Mutex<HashMap<String, Vec<CellRoute>>>,
    domain: Mutex<HashMap<String, Vec<CellRoute>>>,
    topic: Mutex<HashMap<String, Arc<Vec<CellRoute>>>>,
    default_route: Mutex<Option<CellRoute>>,
    dumpster: Mutex<Option<CellRoute>>,
}

impl CellRoutingTable {
    pub fn new() -> Self {
        CellRoutingTable::default()
    }

    pub fn add(&self, route: CellRoute) -> RoutingResult<()> {
        match route.kind() {
            RouteKind::Exact | RouteKind::Alias => {
                let dest = format!("{}@{}", route.cell_name(), route.domain_name());
                Self::add_to(&mut lock(&self.exact), dest, route)
            }
            RouteKind::Wellknown => {
                let dest = route.cell_name().to_string();
                Self::add_to(&mut lock(&self.wellknown), dest, route)
            }
            RouteKind::Domain => {
                let dest = route.domain_name().to_string();
                Self::add_to(&mut lock(&self.domain), dest, route)
            }
            RouteKind::Topic => {
                let dest = route.cell_name().to_string();
                let mut topics = lock(&self.topic);
                let routes = topics.entry(dest.clone()).or_default();
                if routes.contains(&route) {
                    return Err(RoutingTableError::DuplicateRoute(dest));
                }
                Arc::make_mut(routes).push(route);
                Ok(())
            }
            RouteKind::Default => Self::set_singleton(&self.default_route, route, "default"),
            RouteKind::Dumpster => Self::set_singleton(&self.dumpster, route, "dumpster"),
        }
    }

    pub fn delete(&self, route: &CellRoute) -> RoutingResult<()> {
        match route.kind() {
            RouteKind::Exact | RouteKind::Alias => {
                let dest = format!("{}@{}", route.cell_name(), route.domain_name());
                Self::delete_from(&mut lock(&self.exact), &dest, route)
            }
            RouteKind::Wellknown => {
                Self::delete_from(&mut lock(&self.wellknown), route.cell_name(), route)
            }
            RouteKind::Domain => {
                Self::delete_from(&mut lock(&self.domain), route.domain_name(), route)
            }
            RouteKind::Topic => {
                let dest = route.cell_name();
                let mut topics = lock(&self.topic);
                let routes = topics
                    .get_mut(dest)
                    .ok_or_else(|| RoutingTableError::NoSuchRoute(dest.to_string()))?;
                let index = routes
                    .iter()
                    .position(|r| r == route)
                    .ok_or_else(|| RoutingTableError::NoSuchRoute(dest.to_string()))?;
                Arc::make_mut(routes).remove(index);
                if routes.is_empty() {
                    topics.remove(dest);
                }
                Ok(())
            }
            RouteKind::Default => Self::clear_singleton(&self.default_route, route, "default"),
            RouteKind::Dumpster => Self::clear_singleton(&self.dumpster, route, "dumpster"),
        }
    }

    /// Removes every route, of any kind, whose gateway equals `gateway`.
    /// Returns the removed routes.
    pub fn delete_gateway(&self, gateway: &str) -> Vec<CellRoute> {
        let mut deleted = Vec::new();

        for map in [&self.exact, &self.wellknown, &self.domain] {
            let mut routes = lock(map);
            routes.retain(|_, entries| {
                entries.retain(|route| {
                    if route.gateway() == gateway {
                        deleted.push(route.clone());
                        false
                    } else {
                        true
                    }
                });
                !entries.is_empty()
            });
        }

        {
            let mut topics = lock(&self.topic);
            topics.retain(|_, entries| {
                if !entries.iter().any(|route| route.gateway() == gateway) {
                    return true;
                }
                let mut kept = Vec::with_capacity(entries.len());
                for route in entries.iter() {
                    if route.gateway() == gateway {
                        deleted.push(route.clone());
                    } else {
                        kept.push(route.clone());
                    }
                }
                if kept.is_empty() {
                    return false;
                }
                *entries = Arc::new(kept);
                true
            });
        }

        for slot in [&self.default_route, &self.dumpster] {
            let mut current = lock(slot);
            if current.as_ref().is_some_and(|route| route.gateway() == gateway) {
                deleted.extend(current.take());
            }
        }

        deleted
    }

    /// Picks the route for an address: exact match first, then the
    /// wellknown index for local addresses or the domain index otherwise,
    /// finally the default route.
    pub fn find(&self, addr: &CellAddress) -> Option<CellRoute> {
        let dest = format!("{}@{}", addr.cell_name(), addr.domain_name());
        if let Some(route) = Self::first_of(&lock(&self.exact), &dest) {
            return Some(route);
        }

        if addr.is_local() {
            if let Some(route) = Self::first_of(&lock(&self.wellknown), addr.cell_name()) {
                return Some(route);
            }
        } else if let Some(route) = Self::first_of(&lock(&self.domain), addr.domain_name()) {
            return Some(route);
        }

        lock(&self.default_route).clone()
    }

    /// All topic routes subscribed to the cell name. Only local addresses
    /// have topic routes; the returned handle shares the live set.
    pub fn find_topic_routes(&self, addr: &CellAddress) -> Arc<Vec<CellRoute>> {
        if !addr.is_local() {
            return Arc::new(Vec::new());
        }
        lock(&self.topic)
            .get(addr.cell_name())
            .cloned()
            .unwrap_or_else(|| Arc::new(Vec::new()))
    }

    /// Flat snapshot of every route, index by index.
    pub fn routing_list(&self) -> Vec<CellRoute> {
        let mut routes = Vec::new();
        for entries in lock(&self.topic).values() {
            routes.extend(entries.iter().cloned());
        }
        for map in [&self.exact, &self.wellknown, &self.domain] {
            for entries in lock(map).values() {
                routes.extend(entries.iter().cloned());
            }
        }
        routes.extend(lock(&self.default_route).clone());
        routes.extend(lock(&self.dumpster).clone());
        routes
    }

    fn add_to(
        map: &mut HashMap<String, Vec<CellRoute>>,
        dest: String,
        route: CellRoute,
    ) -> RoutingResult<()> {
        let entries = map.entry(dest.clone()).or_default();
        if entries.contains(&route) {
            return Err(RoutingTableError::DuplicateRoute(dest));
        }
        entries.push(route);
        Ok(())
    }

    fn delete_from(
        map: &mut HashMap<String, Vec<CellRoute>>,
        dest: &str,
        route: &CellRoute,
    ) -> RoutingResult<()> {
        let entries = map
            .get_mut(dest)
            .ok_or_else(|| RoutingTableError::NoSuchRoute(dest.to_string()))?;
        let index = entries
            .iter()
            .position(|r| r == route)
            .ok_or_else(|| RoutingTableError::NoSuchRoute(dest.to_string()))?;
        entries.remove(index);
        if entries.is_empty() {
            map.remove(dest);
        }
        Ok(())
    }

    fn first_of(map: &HashMap<String, Vec<CellRoute>>, dest: &str) -> Option<CellRoute> {
        map.get(dest).and_then(|entries| entries.first()).cloned()
    }

    fn set_singleton(
        slot: &Mutex<Option<CellRoute>>,
        route: CellRoute,
        what: &str,
    ) -> RoutingResult<()> {
        let mut current = lock(slot);
        if current.is_some() {
            return Err(RoutingTableError::DuplicateRoute(what.to_string()));
        }
        *current = Some(route);
        Ok(())
    }

    fn clear_singleton(
        slot: &Mutex<Option<CellRoute>>,
        route: &CellRoute,
        what: &str,
    ) -> RoutingResult<()> {
        let mut current = lock(slot);
        if current.as_ref() != Some(route) {
            return Err(RoutingTableError::NoSuchRoute(what.to_string()));
        }
        *current = None;
        Ok(())
    }
}

impl fmt::Display for CellRoutingTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let routes = self.routing_list();

        let mut cell_w = "CELL".len();
        let mut domain_w = "DOMAIN".len();
        let mut gateway_w = "GATEWAY".len();
        for route in &routes {
            cell_w = cell_w.max(route.cell_name().len());
            domain_w = domain_w.max(route.domain_name().len());
            gateway_w = gateway_w.max(route.gateway().len());
        }

        writeln!(
            f,
            "{:cell_w$} {:domain_w$} {:gateway_w$} TYPE",
            "CELL", "DOMAIN", "GATEWAY"
        )?;
        for route in &routes {
            writeln!(
                f,
                "{:cell_w$} {:domain_w$} {:gateway_w$} {}",
                route.cell_name(),
                route.domain_name(),
                route.gateway(),
                route.kind().name()
            )?;
        }
        Ok(())
    }
}
