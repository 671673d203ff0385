//! Per-call options
//!
//! Every field is optional; unset fields fall back to the manager's
//! configuration (default layer, default TTL).

use std::time::Duration;

/// Options for reads
#[derive(Debug, Clone, Default)]
pub struct GetOptions {
    /// Layer to read from (default layer when `None`)
    pub layer: Option<String>,
    /// Bypass the cache for this call
    pub skip_cache: bool,
}

impl GetOptions {
    pub fn layer(mut self, layer: impl Into<String>) -> Self {
        self.layer = Some(layer.into());
        self
    }

    pub fn skip_cache(mut self, skip: bool) -> Self {
        self.skip_cache = skip;
        self
    }
}

/// Options for writes
#[derive(Debug, Clone, Default)]
pub struct SetOptions {
    /// Layer to write to (default layer when `None`)
    pub layer: Option<String>,
    /// Entry lifetime (configured default when `None`)
    pub ttl: Option<Duration>,
    /// Also write to every other layer in the background
    pub propagate: bool,
}

impl SetOptions {
    pub fn layer(mut self, layer: impl Into<String>) -> Self {
        self.layer = Some(layer.into());
        self
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn propagate(mut self, propagate: bool) -> Self {
        self.propagate = propagate;
        self
    }
}

/// Options for deletes
#[derive(Debug, Clone, Default)]
pub struct DeleteOptions {
    pub layer: Option<String>,
    /// Also delete from every other layer in the background
    pub propagate: bool,
}

impl DeleteOptions {
    pub fn layer(mut self, layer: impl Into<String>) -> Self {
        self.layer = Some(layer.into());
        self
    }

    pub fn propagate(mut self, propagate: bool) -> Self {
        self.propagate = propagate;
        self
    }
}

/// Options for `get_or_set`
#[derive(Debug, Clone, Default)]
pub struct GetOrSetOptions {
    pub layer: Option<String>,
    pub ttl: Option<Duration>,
    /// Skip both the cache read and the cache write
    pub skip_cache: bool,
    pub propagate: bool,
    /// On fetch failure, serve a copy found in any other layer
    pub return_stale_on_error: bool,
}

impl GetOrSetOptions {
    pub fn layer(mut self, layer: impl Into<String>) -> Self {
        self.layer = Some(layer.into());
        self
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn skip_cache(mut self, skip: bool) -> Self {
        self.skip_cache = skip;
        self
    }

    pub fn propagate(mut self, propagate: bool) -> Self {
        self.propagate = propagate;
        self
    }

    pub fn return_stale_on_error(mut self, stale: bool) -> Self {
        self.return_stale_on_error = stale;
        self
    }

    /// Read half of these options
    pub fn get_options(&self) -> GetOptions {
        GetOptions {
            layer: self.layer.clone(),
            skip_cache: self.skip_cache,
        }
    }

    /// Write half of these options
    pub fn set_options(&self) -> SetOptions {
        SetOptions {
            layer: self.layer.clone(),
            ttl: self.ttl,
            propagate: self.propagate,
        }
    }
}

impl From<SetOptions> for GetOptions {
    fn from(options: SetOptions) -> Self {
        GetOptions {
            layer: options.layer,
            skip_cache: false,
        }
    }
}

impl From<SetOptions> for GetOrSetOptions {
    fn from(options: SetOptions) -> Self {
        GetOrSetOptions {
            layer: options.layer,
            ttl: options.ttl,
            propagate: options.propagate,
            ..Default::default()
        }
    }
}

impl From<SetOptions> for DeleteOptions {
    fn from(options: SetOptions) -> Self {
        DeleteOptions {
            layer: options.layer,
            propagate: options.propagate,
        }
    }
}
