use std::fmt;

use serde::{Deserialize, Serialize};

const DOMAIN_SUFFIX: &str = ".cms";

/// Which payload shape a host emits. Producers (readout/builder units) publish
/// file-delivery graphs, consumers (filter units) publish per-client job runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostCategory {
    Producer,
    Consumer,
}

impl HostCategory {
    pub fn classify(hostname: &str, producer_prefixes: &[String]) -> Self {
        if producer_prefixes
            .iter()
            .any(|prefix| !prefix.is_empty() && hostname.starts_with(prefix.as_str()))
        {
            Self::Producer
        } else {
            Self::Consumer
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Producer => "producer",
            Self::Consumer => "consumer",
        }
    }
}

impl fmt::Display for HostCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitoredHost {
    pub name: String,
    pub category: HostCategory,
}

impl MonitoredHost {
    pub fn new(name: impl Into<String>, producer_prefixes: &[String]) -> Self {
        let name = name.into();
        let category = HostCategory::classify(&name, producer_prefixes);
        Self { name, category }
    }

    /// Hostname as it appears in stored records (without the domain suffix).
    pub fn store_name(&self) -> &str {
        self.name
            .strip_suffix(DOMAIN_SUFFIX)
            .unwrap_or(self.name.as_str())
    }

    pub fn is_producer(&self) -> bool {
        self.category == HostCategory::Producer
    }
}

/// Keeps the first and last `-` segment: `fu-c2f11-11-01` becomes `fu..01`.
pub fn censor_hostname(hostname: &str) -> String {
    let mut parts = hostname.split('-');
    let first = parts.next().unwrap_or_default();
    match parts.last() {
        Some(last) => format!("{first}..{last}"),
        None => hostname.to_string(),
    }
}
