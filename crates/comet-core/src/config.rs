//! Centralized Configuration Management
//!
//! Consolidates the configuration structures used by the engine so tunables
//! live in one place with documented defaults.

use core::time::Duration;
use serde::{Deserialize, Serialize};

// ----------------------------------------------------------------------------
// Typing Configuration
// ----------------------------------------------------------------------------

/// Configuration for ephemeral typing indicators
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypingConfig {
    /// How long a typing indicator stays visible without a refresh
    pub ttl: Duration,
    /// Minimum gap between rebroadcasts for the same (chat, user)
    pub debounce: Duration,
    /// How often the runtime sweeps for expired indicators
    pub sweep_interval: Duration,
}

impl Default for TypingConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(5),            // indicator lifetime
            debounce: Duration::from_secs(2),       // coalesce rapid re-signals
            sweep_interval: Duration::from_secs(1), // proactive expiry cadence
        }
    }
}

impl TypingConfig {
    /// Short-lived configuration for tests that exercise expiry
    pub fn fast() -> Self {
        Self {
            ttl: Duration::from_millis(150),
            debounce: Duration::from_millis(100),
            sweep_interval: Duration::from_millis(25),
        }
    }
}

// ----------------------------------------------------------------------------
// Channel Configuration
// ----------------------------------------------------------------------------

/// Buffer sizing for the runtime command channel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Buffer size for commands into the hub task
    pub command_buffer_size: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            command_buffer_size: 64, // client signals are small and frequent
        }
    }
}

// ----------------------------------------------------------------------------
// Engine Configuration
// ----------------------------------------------------------------------------

/// Top-level configuration for the Comet engine
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CometConfig {
    pub typing: TypingConfig,
    pub channels: ChannelConfig,
}

impl CometConfig {
    /// Configuration with fast typing expiry for tests
    pub fn for_tests() -> Self {
        Self {
            typing: TypingConfig::fast(),
            channels: ChannelConfig::default(),
        }
    }
}
