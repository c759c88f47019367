//! Network selection and compiled-in seed nodes.
//!
//! A small fixed list of seed nodes bootstraps the service-node pool when no
//! usable pool is cached. Mainnet and testnet carry separate lists; the
//! active network is chosen by daemon configuration.

use serde::{Deserialize, Serialize};

/// Which storage network the client talks to.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    #[default]
    Mainnet,
    Testnet,
}

/// Mainnet seed endpoints.
const MAINNET_SEEDS: &[&str] = &[
    "https://seed1.veilnet.org:4433",
    "https://seed2.veilnet.org:4433",
    "https://seed3.veilnet.org:4433",
];

/// Testnet seed endpoints.
const TESTNET_SEEDS: &[&str] = &["https://seed.testnet.veilnet.org:4433"];

impl Network {
    /// The seed node base URLs for this network.
    pub fn seed_urls(self) -> &'static [&'static str] {
        match self {
            Network::Mainnet => MAINNET_SEEDS,
            Network::Testnet => TESTNET_SEEDS,
        }
    }
}

impl std::fmt::Display for Network {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Network::Mainnet => write!(f, "mainnet"),
            Network::Testnet => write!(f, "testnet"),
        }
    }
}
