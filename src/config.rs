//! Process-wide tuning defaults.
//!
//! Nothing here changes the observable semantics of a [`crate::Map`] or
//! [`crate::Exchanger`] — per the `stride_hint` invariant, tuning knobs are
//! advisory only. This just gives an application a single place to set the
//! defaults it wants wired into calls that don't specify them explicitly,
//! built the same way the pack's other configuration layers are: a plain
//! `serde`-derived struct with a `Default`, optionally overlaid from a TOML
//! file or the environment via the `config` crate.

use serde::{Deserialize, Serialize};

use crate::exchanger::HwHint;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DistdirConfig {
    /// Default `stride_hint` passed to [`crate::Map::new`] when a caller
    /// doesn't supply one. `-1` disables the (currently unimplemented)
    /// stride optimization.
    pub default_stride_hint: i64,

    /// Promote `DuplicateOwner` from a logged warning to a hard
    /// [`crate::Error::DuplicateOwner`].
    pub strict_duplicate_owner: bool,

    /// Default hardware hint for newly constructed exchangers.
    pub default_hw_hint: HwHint,

    /// Cap on how many offending indices an `UnmatchedIndex` error
    /// carries, to bound diagnostic payload size.
    pub unmatched_index_report_cap: usize,
}

impl Default for DistdirConfig {
    fn default() -> Self {
        Self {
            default_stride_hint: -1,
            strict_duplicate_owner: false,
            default_hw_hint: HwHint::Host,
            unmatched_index_report_cap: 64,
        }
    }
}

impl DistdirConfig {
    /// Load configuration, layering a TOML file (if present) and
    /// `DISTDIR_`-prefixed environment variables over the defaults.
    ///
    /// Never fails on a missing file; returns an error only if a present
    /// file or environment variable cannot be parsed.
    pub fn load(toml_path: Option<&str>) -> crate::Result<Self> {
        let mut builder = config::Config::builder()
            .add_source(config::Config::try_from(&Self::default()).map_err(|e| {
                crate::Error::GroupInconsistent(format!("default config serialization: {e}"))
            })?);

        if let Some(path) = toml_path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        builder = builder.add_source(config::Environment::with_prefix("DISTDIR"));

        let cfg = builder
            .build()
            .map_err(|e| crate::Error::GroupInconsistent(format!("config build: {e}")))?;

        cfg.try_deserialize()
            .map_err(|e| crate::Error::GroupInconsistent(format!("config deserialize: {e}")))
    }
}
