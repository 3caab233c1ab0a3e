//! Provider routing policy.
//!
//! Pure decision of which delivery channel serves a variable, from its
//! source tag, its cadence, and whether the secondary extension channel is
//! live. The client re-queries this on every operation rather than storing
//! a binding on the variable, so routing always reflects the current
//! channel state.

use simsync_types::{Cadence, VarSource};
use thiserror::Error;

/// A delivery channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    /// The host's native telemetry/event interface.
    Primary,
    /// The optional extension client for variable types the primary
    /// channel cannot address.
    Secondary,
}

/// Routing failure: no live channel can serve the variable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot serve '{tag}' type variable without the extension channel")]
pub struct RouteError {
    /// The source tag that could not be routed.
    pub tag: char,
}

/// Choose the channel that serves a variable.
///
/// Properties and local script variables prefer the primary channel unless
/// they need continuous sub-frame polling, which the primary channel cannot
/// cheaply support; those move to the secondary channel when it is live.
/// Computed expressions and unrecognized tags require the secondary channel.
pub fn choose_provider(
    source: VarSource,
    cadence: Cadence,
    secondary_live: bool,
) -> Result<Provider, RouteError> {
    let primary_capable = matches!(source, VarSource::SimProperty | VarSource::Local);
    if !primary_capable {
        if secondary_live {
            return Ok(Provider::Secondary);
        }
        return Err(RouteError { tag: source.tag() });
    }
    if cadence.needs_scheduled_poll() && secondary_live {
        return Ok(Provider::Secondary);
    }
    Ok(Provider::Primary)
}
