use serde::{Deserialize, Serialize};
use std::fmt;

/// The domain name a message carries when it is addressed within the local
/// domain; such addresses are matched against wellknown and topic routes.
pub const LOCAL_DOMAIN: &str = "local";

/// Address of a cell: `cell@domain`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CellAddress {
    cell: String,
    domain: String,
}

impl CellAddress {
    pub fn new(cell: impl Into<String>, domain: impl Into<String>) -> Self {
        CellAddress {
            cell: cell.into(),
            domain: domain.into(),
        }
    }

    /// Parses `cell@domain`; a missing domain part means "local".
    pub fn parse(s: &str) -> Self {
        match s.split_once('@') {
            Some((cell, domain)) => CellAddress::new(cell, domain),
            None => CellAddress::new(s, LOCAL_DOMAIN),
        }
    }

    pub fn cell_name(&self) -> &str {
        &self.cell
    }

    pub fn domain_name(&self) -> &str {
        &self.domain
    }

    pub fn is_local(&self) -> bool {
        self.domain == LOCAL_DOMAIN
    }
}

impl fmt::Display for CellAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.cell, self.domain)
    }
}

/// How a route matches a destination address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RouteKind {
    /// Matches one `cell@domain` pair.
    Exact,
    /// Alternative name for a cell; matched like an exact route.
    Alias,
    /// Matches a cell name in the local domain.
    Wellknown,
    /// Matches every cell of one domain.
    Domain,
    /// Publish/subscribe route; several may share one cell name.
    Topic,
    /// Used when nothing else matches.
    Default,
    /// Catch-all for undeliverable messages.
    Dumpster,
}

impl RouteKind {
    pub fn name(self) -> &'static str {
        match self {
            RouteKind::Exact => "exact",
            RouteKind::Alias => "alias",
            RouteKind::Wellknown => "wellknown",
            RouteKind::Domain => "domain",
            RouteKind::Topic => "topic",
            RouteKind::Default => "default",
            RouteKind::Dumpster => "dumpster",
        }
    }
}

/// A routing rule: messages for (`cell`, `domain`) go to the `gateway`
/// address. Which of the fields take part in matching depends on the kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CellRoute {
    kind: RouteKind,
    cell: String,
    domain: String,
    gateway: String,
}

impl CellRoute {
    pub fn new(
        kind: RouteKind,
        cell: impl Into<String>,
        domain: impl Into<String>,
        gateway: impl Into<String>,
    ) -> Self {
        CellRoute {
            kind,
            cell: cell.into(),
            domain: domain.into(),
            gateway: gateway.into(),
        }
    }

    pub fn kind(&self) -> RouteKind {
        self.kind
    }

    pub fn cell_name(&self) -> &str {
        &self.cell
    }

    pub fn domain_name(&self) -> &str {
        &self.domain
    }

    /// The next-hop gateway this route delivers to.
    pub fn gateway(&self) -> &str {
        &self.gateway
    }
}

impl fmt::Display for CellRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}@{} -> {} [{}]",
            self.cell,
            self.domain,
            self.gateway,
            self.kind.name()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_parse() {
        let addr = CellAddress::parse("ns0@core-domain");
        assert_eq!(addr.cell_name(), "ns0");
        assert_eq!(addr.domain_name(), "core-domain");
        assert!(!addr.is_local());

        let bare = CellAddress::parse("ns0");
        assert!(bare.is_local());
        assert_eq!(bare.to_string(), "ns0@local");
    }
}
