//! Host selection policies for picking one uri out of a service's address set

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Hook deciding which registered uri a discovery call returns
pub trait HostSelector: Send + Sync {
    /// Pick one host. Returns `None` only for an empty slice.
    fn pick_host<'a>(&self, hosts: &'a [String]) -> Option<&'a str>;
}

/// Built-in selection strategies
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SelectionStrategy {
    /// Uniform random choice among all registered uris
    #[default]
    Random,
    /// Cycle through the uris in record order
    RoundRobin,
}

impl SelectionStrategy {
    pub fn selector(self) -> Box<dyn HostSelector> {
        match self {
            SelectionStrategy::Random => Box::new(RandomSelector),
            SelectionStrategy::RoundRobin => Box::new(RoundRobinSelector::new()),
        }
    }
}

impl FromStr for SelectionStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "random" => Ok(SelectionStrategy::Random),
            "round-robin" | "round_robin" | "roundrobin" => Ok(SelectionStrategy::RoundRobin),
            other => Err(format!("unknown selection strategy: {}", other)),
        }
    }
}

/// Uniform random selection
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomSelector;

impl HostSelector for RandomSelector {
    fn pick_host<'a>(&self, hosts: &'a [String]) -> Option<&'a str> {
        if hosts.is_empty() {
            return None;
        }
        let idx = rand::thread_rng().gen_range(0..hosts.len());
        hosts.get(idx).map(String::as_str)
    }
}

/// Round-robin selection over whatever set is current at call time
#[derive(Debug, Default)]
pub struct RoundRobinSelector {
    counter: AtomicUsize,
}

impl RoundRobinSelector {
    pub fn new() -> Self {
        Self::default()
    }
}

impl HostSelector for RoundRobinSelector {
    fn pick_host<'a>(&self, hosts: &'a [String]) -> Option<&'a str> {
        if hosts.is_empty() {
            return None;
        }
        let current = self.counter.fetch_add(1, Ordering::Relaxed);
        hosts.get(current % hosts.len()).map(String::as_str)
    }
}
