use std::collections::{BTreeSet, HashMap};

use serde::Serialize;

/// One registered service as the registry reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceRecord {
    pub id: String,
    pub name: String,
    pub address: String,
    pub port: u16,
    pub tags: BTreeSet<String>,
}

impl ServiceRecord {
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }
}

/// Registry state at one poll. Replaced wholesale by the next poll.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    services: HashMap<String, ServiceRecord>,
}

impl Snapshot {
    pub fn new(services: HashMap<String, ServiceRecord>) -> Self {
        Self { services }
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&ServiceRecord> {
        self.services.get(id)
    }

    /// Iteration order is unspecified; consumers must sort what they derive.
    pub fn services(&self) -> impl Iterator<Item = &ServiceRecord> {
        self.services.values()
    }
}

impl FromIterator<ServiceRecord> for Snapshot {
    fn from_iter<I: IntoIterator<Item = ServiceRecord>>(iter: I) -> Self {
        Self {
            services: iter.into_iter().map(|s| (s.id.clone(), s)).collect(),
        }
    }
}
