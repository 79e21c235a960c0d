//! Browser bridge. The page owns the flamegraph widget; this crate owns the
//! view state, the derived metric and the colors, and keeps the location
//! fragment in sync.
//!
//! A load is split so the page can await the network:
//! `select_file` / `start` hand out a [`PendingLoad`], [`fetch_profile`]
//! resolves it, and [`FlameViewer::finish`] applies it (or drops it if a
//! newer selection superseded it).

use ratioflame_core::model::NodeId;
use ratioflame_core::source::SourceError;
use ratioflame_core::state::{ShareError, ShareTarget};
use ratioflame_core::viewer::{LoadOutcome, LoadRequest, LoadTicket};
use ratioflame_core::{Recompute, Transition, Viewer, ViewerConfig};
use wasm_bindgen::JsCast;
use wasm_bindgen::prelude::*;
use wasm_bindgen_futures::JsFuture;

/// The page's location fragment.
struct BrowserLocation;

impl ShareTarget for BrowserLocation {
    fn current(&self) -> String {
        web_sys::window()
            .and_then(|w| w.location().hash().ok())
            .unwrap_or_default()
    }

    fn replace(&mut self, fragment: &str) -> Result<(), ShareError> {
        let refused = |e: JsValue| ShareError::Refused(format!("{e:?}"));
        let window = web_sys::window().ok_or_else(|| ShareError::Refused("no window".into()))?;
        window
            .history()
            .map_err(refused)?
            .replace_state_with_url(&JsValue::NULL, "", Some(fragment))
            .map_err(refused)
    }

    fn assign(&mut self, fragment: &str) {
        let Some(window) = web_sys::window() else {
            return;
        };
        if let Err(e) = window.location().set_hash(fragment) {
            web_sys::console::error_1(&format!("ratioflame: cannot set location: {e:?}").into());
        }
    }
}

/// A data file the viewer is waiting for.
#[wasm_bindgen]
pub struct PendingLoad {
    ticket: u64,
    file_key: String,
    url: String,
}

#[wasm_bindgen]
impl PendingLoad {
    #[wasm_bindgen(getter)]
    pub fn file_key(&self) -> String {
        self.file_key.clone()
    }

    #[wasm_bindgen(getter)]
    pub fn url(&self) -> String {
        self.url.clone()
    }
}

/// The result of fetching a [`PendingLoad`].
#[wasm_bindgen]
pub struct FetchedProfile {
    ticket: u64,
    result: Result<Vec<u8>, SourceError>,
}

/// Fetch the data file of `pending`. Never rejects: failures are carried to
/// [`FlameViewer::finish`].
#[wasm_bindgen]
pub async fn fetch_profile(pending: PendingLoad) -> FetchedProfile {
    FetchedProfile {
        ticket: pending.ticket,
        result: fetch_bytes(&pending.url).await,
    }
}

async fn fetch_bytes(url: &str) -> Result<Vec<u8>, SourceError> {
    let failed = |e: JsValue| SourceError::Fetch(format!("{e:?}"));
    let window = web_sys::window().ok_or_else(|| SourceError::Fetch("no window".into()))?;
    let resp_value = JsFuture::from(window.fetch_with_str(url))
        .await
        .map_err(failed)?;
    let resp: web_sys::Response = resp_value
        .dyn_into()
        .map_err(|_| SourceError::Fetch("not a Response".into()))?;
    if !resp.ok() {
        return Err(SourceError::Status(resp.status()));
    }
    let buf = JsFuture::from(resp.array_buffer().map_err(failed)?)
        .await
        .map_err(failed)?;
    Ok(js_sys::Uint8Array::new(&buf).to_vec())
}

#[wasm_bindgen]
pub struct FlameViewer {
    viewer: Viewer,
    location: BrowserLocation,
}

impl FlameViewer {
    fn pending(&self, recompute: Recompute) -> Option<PendingLoad> {
        let Recompute::Load(LoadRequest { ticket, file_key }) = recompute else {
            return None;
        };
        Some(PendingLoad {
            ticket: ticket.id(),
            url: self.viewer.config().data_url(&file_key),
            file_key,
        })
    }
}

#[wasm_bindgen]
impl FlameViewer {
    /// `config_json` is an optional `ViewerConfig` document.
    #[wasm_bindgen(constructor)]
    pub fn new(config_json: Option<String>) -> Result<FlameViewer, JsError> {
        let config = match config_json {
            Some(json) => ViewerConfig::from_slice(json.as_bytes())
                .map_err(|e| JsError::new(&e.to_string()))?,
            None => ViewerConfig::default(),
        };
        Ok(Self {
            viewer: Viewer::new(config),
            location: BrowserLocation,
        })
    }

    /// Adopt the location fragment. Call at startup and on `hashchange`.
    pub fn start(&mut self) -> Option<PendingLoad> {
        let shared = self.location.current();
        let recompute = self
            .viewer
            .apply(Transition::LoadFromSharedState(shared), &mut self.location);
        self.pending(recompute)
    }

    pub fn select_file(&mut self, file_key: String) -> Option<PendingLoad> {
        let recompute = self
            .viewer
            .apply(Transition::SelectFile(file_key), &mut self.location);
        self.pending(recompute)
    }

    /// Returns true when the hierarchy was re-derived and must be redrawn.
    pub fn select_metric(&mut self, metric_key: String) -> bool {
        let recompute = self
            .viewer
            .apply(Transition::SelectMetric(metric_key), &mut self.location);
        recompute == Recompute::Rederive
    }

    /// Returns false when the value was rejected.
    pub fn set_threshold(&mut self, threshold: f64) -> bool {
        let recompute = self
            .viewer
            .apply(Transition::SetThreshold(threshold), &mut self.location);
        recompute == Recompute::Recolor
    }

    /// Apply a fetched profile. Resolves to false when a newer selection
    /// superseded it; rejects when the fetch or the parse failed, leaving
    /// the current view as it was.
    pub fn finish(&mut self, fetched: FetchedProfile) -> Result<bool, JsError> {
        let outcome = self
            .viewer
            .finish_load(
                LoadTicket::from_id(fetched.ticket),
                fetched.result,
                &mut self.location,
            )
            .map_err(|e| {
                web_sys::console::error_1(&format!("ratioflame: {e}").into());
                JsError::new(&e.to_string())
            })?;
        Ok(outcome == LoadOutcome::Applied)
    }

    /// Annotated hierarchy for the widget: `{id, name, value, metricVal, children}`.
    pub fn hierarchy_json(&self) -> Option<String> {
        self.viewer.hierarchy().map(|v| v.to_string())
    }

    /// Fill color of node `id` under the current threshold, as `#rrggbb`.
    pub fn color_for(&self, id: usize) -> Option<String> {
        self.viewer.color_of(NodeId(id)).map(|c| c.to_hex())
    }

    /// `[[id, "#rrggbb"], ...]` for every annotated node.
    pub fn colors_json(&self) -> String {
        let Some(derived) = self.viewer.derived() else {
            return "[]".to_string();
        };
        let colors: Vec<serde_json::Value> = derived
            .annotations
            .visit_order()
            .iter()
            .filter_map(|&id| {
                let color = self.viewer.color_of(id)?;
                Some(serde_json::json!([id.index(), color.to_hex()]))
            })
            .collect();
        serde_json::Value::from(colors).to_string()
    }

    /// Raw counters of node `id` as compact JSON, e.g. `{"cpu-cycles":40}`.
    pub fn details_json(&self, id: usize) -> Option<String> {
        self.viewer
            .details(NodeId(id))
            .map(|d| d.counters_json())
    }

    pub fn node_name(&self, id: usize) -> Option<String> {
        self.viewer.details(NodeId(id)).map(|d| d.name)
    }

    pub fn metrics_json(&self) -> String {
        serde_json::Value::from(self.viewer.metrics()).to_string()
    }

    pub fn slider_max(&self) -> Option<f64> {
        self.viewer.slider().map(|s| s.max)
    }

    pub fn slider_step(&self) -> Option<f64> {
        self.viewer.slider().map(|s| s.step)
    }

    pub fn max_label(&self) -> Option<String> {
        self.viewer.summary().map(|s| s.max_label())
    }

    pub fn file_key(&self) -> String {
        self.viewer.state().file_key.clone()
    }

    pub fn metric_key(&self) -> String {
        self.viewer.state().metric_key.clone()
    }

    pub fn threshold(&self) -> f64 {
        self.viewer.state().threshold
    }

    pub fn share_string(&self) -> String {
        self.viewer.share_string()
    }
}
