//! The viewer state machine.
//!
//! All user input arrives as a [`Transition`]. Each transition declares
//! what it changes in [`ViewState`] and which part of the pipeline must
//! run again ([`Recompute`]):
//!
//! ```text
//!   SelectFile ─────────────▶ Load ─▶ derive ─▶ calibrate ─▶ color
//!   LoadFromSharedState ────▶ Load ─▶ derive ─▶ calibrate ─▶ color
//!   SelectMetric ───────────────────▶ derive ─▶ calibrate ─▶ color
//!   SetThreshold ───────────────────────────────────────────▶ color
//! ```
//!
//! Loading is the one step that may be asynchronous. Every load carries a
//! [`LoadTicket`]; only the most recent ticket is honoured, so a slow
//! response for a file the user already switched away from is dropped.

use ratioflame_protocol::{Color, Point, RenderCommand, Viewport};
use serde_json::Value;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::calibrate::{DistributionSummary, SliderRange, calibrate};
use crate::color::{ColorPolicy, SequentialScale};
use crate::config::{LayoutOptions, ViewerConfig};
use crate::derive::{Annotations, derive};
use crate::export::{NodeDetails, hierarchy_json};
use crate::model::{NodeId, ProfileTree};
use crate::parsers::{CounterJsonError, parse_counter_tree};
use crate::source::{ProfileSource, SourceError};
use crate::state::{PartialViewState, ShareTarget, ViewState, deserialize, publish, serialize};
use crate::views::FlameLayout;

#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    SelectFile(String),
    SelectMetric(String),
    SetThreshold(f64),
    /// Adopt a share string. At startup its fields apply at once; once a
    /// profile is shown they apply when the named file has loaded.
    LoadFromSharedState(String),
}

/// Work a transition leaves for the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum Recompute {
    Nothing,
    /// Fetch the file and hand the bytes to [`Viewer::finish_load`].
    Load(LoadRequest),
    /// Metric changed: derivation, calibration and coloring already ran.
    Rederive,
    /// Threshold changed: only colors differ. Repaint.
    Recolor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct LoadTicket(u64);

impl LoadTicket {
    pub fn id(self) -> u64 {
        self.0
    }

    pub fn from_id(id: u64) -> Self {
        Self(id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadRequest {
    pub ticket: LoadTicket,
    pub file_key: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// The file is now the displayed profile.
    Applied,
    /// A newer load superseded this one; the result was dropped.
    Stale,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to fetch {file_key:?}: {source}")]
    Source {
        file_key: String,
        #[source]
        source: SourceError,
    },
    #[error("failed to parse {file_key:?}: {source}")]
    Parse {
        file_key: String,
        #[source]
        source: CounterJsonError,
    },
}

/// Everything computed from one (file, metric) selection.
#[derive(Debug, Clone)]
pub struct Derived {
    pub annotations: Annotations,
    pub summary: DistributionSummary,
    pub slider: SliderRange,
    pub policy: ColorPolicy,
    generation: u64,
}

#[derive(Debug)]
struct Loaded {
    file_key: String,
    tree: ProfileTree,
}

/// An outstanding load and the link fields it commits on success.
#[derive(Debug)]
struct Pending {
    request: LoadRequest,
    commit: PartialViewState,
}

#[derive(Debug)]
struct CachedLayout {
    generation: u64,
    width: f64,
    options: LayoutOptions,
    layout: FlameLayout,
}

/// Owns the authoritative `ViewState` and the cache derived from it.
#[derive(Debug)]
pub struct Viewer {
    config: ViewerConfig,
    state: ViewState,
    loaded: Option<Loaded>,
    derived: Option<Derived>,
    layout: Option<CachedLayout>,
    pending: Option<Pending>,
    next_ticket: u64,
    derivations: u64,
}

impl Viewer {
    pub fn new(config: ViewerConfig) -> Self {
        let state = config.defaults.clone();
        Self {
            config,
            state,
            loaded: None,
            derived: None,
            layout: None,
            pending: None,
            next_ticket: 0,
            derivations: 0,
        }
    }

    pub fn config(&self) -> &ViewerConfig {
        &self.config
    }

    pub fn state(&self) -> &ViewState {
        &self.state
    }

    /// The canonical share string for the current state.
    pub fn share_string(&self) -> String {
        format!("#{}", serialize(&self.state))
    }

    pub fn apply(&mut self, transition: Transition, share: &mut dyn ShareTarget) -> Recompute {
        match transition {
            Transition::SelectFile(file_key) => {
                Recompute::Load(self.request_load(file_key, PartialViewState::default()))
            }
            Transition::SelectMetric(metric_key) => {
                self.state.metric_key = metric_key;
                publish(share, &self.state);
                if self.loaded.is_some() {
                    self.rederive();
                    Recompute::Rederive
                } else {
                    Recompute::Nothing
                }
            }
            Transition::SetThreshold(threshold) => {
                if !(threshold.is_finite() && threshold >= 0.0) {
                    warn!(threshold, "ignoring invalid threshold");
                    return Recompute::Nothing;
                }
                self.state.threshold = threshold;
                publish(share, &self.state);
                Recompute::Recolor
            }
            Transition::LoadFromSharedState(shared) => {
                let partial = deserialize(&shared);
                if self.loaded.is_some() {
                    // A profile is on screen: nothing changes until the
                    // linked file has loaded.
                    let mut staged = self.state.clone();
                    staged.merge(partial.clone());
                    return Recompute::Load(self.request_load(staged.file_key, partial));
                }
                // Startup: the link is the initial state, and an incomplete
                // link becomes complete right away.
                self.state.merge(partial);
                publish(share, &self.state);
                if self.state.file_key.is_empty() {
                    Recompute::Nothing
                } else {
                    let file_key = self.state.file_key.clone();
                    Recompute::Load(self.request_load(file_key, PartialViewState::default()))
                }
            }
        }
    }

    fn request_load(&mut self, file_key: String, commit: PartialViewState) -> LoadRequest {
        self.next_ticket += 1;
        let request = LoadRequest {
            ticket: LoadTicket(self.next_ticket),
            file_key,
        };
        self.pending = Some(Pending {
            request: request.clone(),
            commit,
        });
        request
    }

    /// The load whose result will be accepted, if any.
    pub fn pending(&self) -> Option<&LoadRequest> {
        self.pending.as_ref().map(|p| &p.request)
    }

    /// Complete a load started by `apply`.
    ///
    /// On failure nothing changes: the previous profile, its derivation and
    /// the share string stay as they were.
    pub fn finish_load(
        &mut self,
        ticket: LoadTicket,
        result: Result<Vec<u8>, SourceError>,
        share: &mut dyn ShareTarget,
    ) -> Result<LoadOutcome, LoadError> {
        let Some(Pending { request, commit }) =
            self.pending.take_if(|p| p.request.ticket == ticket)
        else {
            warn!(ticket = ticket.id(), "discarding stale load result");
            return Ok(LoadOutcome::Stale);
        };
        let file_key = request.file_key;

        let bytes = result.map_err(|source| {
            error!(file_key = %file_key, %source, "load failed");
            LoadError::Source {
                file_key: file_key.clone(),
                source,
            }
        })?;
        let tree = parse_counter_tree(&bytes).map_err(|source| {
            error!(file_key = %file_key, %source, "profile is malformed");
            LoadError::Parse {
                file_key: file_key.clone(),
                source,
            }
        })?;

        info!(file_key = %file_key, nodes = tree.len(), "loaded profile");
        self.state.merge(commit);
        self.state.file_key = file_key.clone();
        self.loaded = Some(Loaded { file_key, tree });
        self.rederive();
        publish(share, &self.state);
        Ok(LoadOutcome::Applied)
    }

    /// Apply a transition and, if it needs a file, load it synchronously.
    pub fn run(
        &mut self,
        transition: Transition,
        source: &dyn ProfileSource,
        share: &mut dyn ShareTarget,
    ) -> Result<Recompute, LoadError> {
        let recompute = self.apply(transition, share);
        if let Recompute::Load(request) = &recompute {
            let result = source.load(&request.file_key);
            self.finish_load(request.ticket, result, share)?;
        }
        Ok(recompute)
    }

    fn rederive(&mut self) {
        let Some(loaded) = &self.loaded else {
            return;
        };
        let annotations = derive(&loaded.tree, &self.state.metric_key, &self.config.counters);
        let summary = calibrate(&annotations, self.config.calibration.percentile);
        let slider = SliderRange::from_summary(&summary, &self.config.calibration);
        let policy = ColorPolicy::new(
            SequentialScale::from_summary(&summary),
            self.config.palette.clone(),
        );
        self.derivations += 1;
        self.derived = Some(Derived {
            annotations,
            summary,
            slider,
            policy,
            generation: self.derivations,
        });
    }

    /// How many times the derive/calibrate pipeline has run.
    pub fn derivations(&self) -> u64 {
        self.derivations
    }

    /// Key of the displayed profile (may lag `state().file_key` while a
    /// shared link's file is still loading).
    pub fn loaded_file(&self) -> Option<&str> {
        self.loaded.as_ref().map(|l| l.file_key.as_str())
    }

    pub fn tree(&self) -> Option<&ProfileTree> {
        self.loaded.as_ref().map(|l| &l.tree)
    }

    pub fn derived(&self) -> Option<&Derived> {
        self.derived.as_ref()
    }

    pub fn summary(&self) -> Option<DistributionSummary> {
        self.derived.as_ref().map(|d| d.summary)
    }

    pub fn slider(&self) -> Option<SliderRange> {
        self.derived.as_ref().map(|d| d.slider)
    }

    /// Counter names of the displayed profile, for the metric selector.
    pub fn metrics(&self) -> Vec<String> {
        self.tree().map(ProfileTree::counter_names).unwrap_or_default()
    }

    pub fn color_of(&self, id: NodeId) -> Option<Color> {
        let derived = self.derived.as_ref()?;
        let ann = derived.annotations.get(id)?;
        Some(derived.policy.color_for(ann.ratio, self.state.threshold))
    }

    pub fn details(&self, id: NodeId) -> Option<NodeDetails> {
        NodeDetails::of(self.tree()?, id)
    }

    pub fn hierarchy(&self) -> Option<Value> {
        Some(hierarchy_json(self.tree()?, &self.derived.as_ref()?.annotations))
    }

    /// Paint with the configured layout options.
    pub fn paint(&mut self, viewport: &Viewport) -> Vec<RenderCommand> {
        let options = self.config.layout.clone();
        self.paint_with(viewport, &options)
    }

    /// Paint the current profile. The layout is recomputed only when the
    /// derivation, width or options changed; a threshold change reuses it.
    pub fn paint_with(&mut self, viewport: &Viewport, options: &LayoutOptions) -> Vec<RenderCommand> {
        let (Some(loaded), Some(derived)) = (&self.loaded, &self.derived) else {
            return Vec::new();
        };
        let fresh = self.layout.as_ref().is_some_and(|c| {
            c.generation == derived.generation && c.width == viewport.width && c.options == *options
        });
        if !fresh {
            self.layout = Some(CachedLayout {
                generation: derived.generation,
                width: viewport.width,
                options: options.clone(),
                layout: FlameLayout::compute(
                    &loaded.tree,
                    &derived.annotations,
                    viewport.width,
                    options,
                ),
            });
        }
        let Some(cached) = &self.layout else {
            return Vec::new();
        };
        cached.layout.paint(
            &loaded.tree,
            &derived.annotations,
            &derived.policy,
            self.state.threshold,
            viewport,
        )
    }

    /// Height of the last painted layout.
    pub fn layout_height(&self) -> f64 {
        self.layout.as_ref().map_or(0.0, |c| c.layout.height())
    }

    /// Node under `point` in the last painted layout.
    pub fn node_at(&self, point: Point, viewport: &Viewport) -> Option<NodeId> {
        let cached = self.layout.as_ref()?;
        let current = self.derived.as_ref()?.generation;
        (cached.generation == current)
            .then(|| cached.layout.node_at(point, viewport))
            .flatten()
    }
}
