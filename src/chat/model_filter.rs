//! App/model compatibility filtering.
//!
//! Applied identically on the server (request validation and fallback) and
//! by the client selector, so both always agree on which models an app may
//! use and which one is its default.

use crate::config::types::{App, Model};

/// The subset of `models` compatible with `app`:
/// 1. restricted to `allowedModels` when that list is non-empty,
/// 2. tool-capable models only when the app binds tools,
/// 3. every capability in `settings.model.filter` must match.
pub fn compatible_models<'a>(models: &'a [Model], app: &App) -> Vec<&'a Model> {
    models
        .iter()
        .filter(|model| {
            if !app.allowed_models.is_empty() && !app.allowed_models.contains(&model.id) {
                return false;
            }
            if !app.tools.is_empty() && !model.supports_tools {
                return false;
            }
            app.settings
                .model
                .filter
                .iter()
                .all(|(capability, required)| model.capability(capability) == Some(*required))
        })
        .collect()
}

/// Default pick within a compatible subset: the app's preferred model if
/// present, else the model flagged default, else the first.
pub fn default_model<'a>(subset: &[&'a Model], app: &App) -> Option<&'a Model> {
    if let Some(preferred) = &app.preferred_model {
        if let Some(model) = subset.iter().find(|m| &m.id == preferred) {
            return Some(model);
        }
    }
    subset
        .iter()
        .find(|m| m.is_default)
        .or_else(|| subset.first())
        .copied()
}

/// Resolve the model for a request. A requested id outside the compatible
/// subset falls back (with a log line) rather than failing; only an empty
/// subset is an error.
pub fn resolve_model<'a>(
    models: &'a [Model],
    app: &App,
    requested: Option<&str>,
) -> Option<&'a Model> {
    let subset = compatible_models(models, app);

    if let Some(requested) = requested {
        if let Some(model) = subset.iter().find(|m| m.id == requested) {
            return Some(model);
        }
        if let Some(fallback) = default_model(&subset, app) {
            log::info!(
                "model '{}' is not compatible with app '{}'; falling back to '{}'",
                requested,
                app.id,
                fallback.id
            );
            return Some(fallback);
        }
        return None;
    }

    default_model(&subset, app)
}
