//! WebAssembly bindings for FocusGate

use fg_core::{to_provider_rules, BlockedSite, ProviderRule, RuleFormat};
use wasm_bindgen::prelude::*;

/// Compiled matcher for one site, owned by the JS caller.
#[wasm_bindgen]
pub struct SiteMatcher {
    inner: fg_core::SiteMatcher,
}

#[wasm_bindgen]
impl SiteMatcher {
    #[wasm_bindgen(constructor)]
    pub fn new(site_json: &str) -> Result<SiteMatcher, JsValue> {
        let site = parse_site(site_json).map_err(|e| JsValue::from_str(&e))?;
        Ok(Self {
            inner: fg_core::SiteMatcher::compile(&site),
        })
    }

    #[wasm_bindgen(getter, js_name = siteId)]
    pub fn site_id(&self) -> String {
        self.inner.site_id().to_string()
    }

    pub fn matches(&self, url: &str) -> bool {
        self.inner.matches(url)
    }
}

/// Translate a JSON array of sites into provider rules.
///
/// Returns `{ rules, skippedSites }`. Sites that fail translation are skipped
/// and reported on the console.
#[wasm_bindgen(js_name = translateSites)]
pub fn translate_sites(sites_json: &str, format: &str) -> Result<JsValue, JsValue> {
    let format: RuleFormat = format.parse().map_err(|e: String| JsValue::from_str(&e))?;
    let translation = translate(sites_json, format).map_err(|e| JsValue::from_str(&e))?;

    for warning in &translation.warnings {
        web_sys::console::warn_1(&JsValue::from_str(warning));
    }

    let rules_json = serde_json::to_string(&translation.rules)
        .map_err(|e| JsValue::from_str(&format!("Failed to serialize rules: {}", e)))?;

    let js_result = js_sys::Object::new();
    let _ = js_sys::Reflect::set(&js_result, &"rules".into(), &js_sys::JSON::parse(&rules_json)?);
    let _ = js_sys::Reflect::set(
        &js_result,
        &"skippedSites".into(),
        &JsValue::from(translation.skipped_sites as u32),
    );
    Ok(js_result.into())
}

#[wasm_bindgen(js_name = matchesSite)]
pub fn matches_site(url: &str, site_json: &str) -> Result<bool, JsValue> {
    let site = parse_site(site_json).map_err(|e| JsValue::from_str(&e))?;
    Ok(fg_core::matches(url, &site))
}

#[wasm_bindgen(js_name = isInternalUrl)]
pub fn is_internal_url(url: &str) -> bool {
    fg_core::url::is_internal_url(url)
}

/// `[siteIndex, patternIndex]` for a rule id, `undefined` outside the id space.
#[wasm_bindgen(js_name = rulePosition)]
pub fn rule_position(id: u32) -> JsValue {
    match fg_core::rule_position(id) {
        Some((site, pattern)) => {
            let pair = js_sys::Array::new();
            pair.push(&JsValue::from(site as u32));
            pair.push(&JsValue::from(pattern as u32));
            pair.into()
        }
        None => JsValue::UNDEFINED,
    }
}

struct Translation {
    rules: Vec<ProviderRule>,
    skipped_sites: usize,
    warnings: Vec<String>,
}

fn parse_site(site_json: &str) -> Result<BlockedSite, String> {
    serde_json::from_str(site_json).map_err(|e| format!("Invalid site: {}", e))
}

/// Disabled sites are skipped but keep their index, so ids match the
/// synchronizer's.
fn translate(sites_json: &str, format: RuleFormat) -> Result<Translation, String> {
    let sites: Vec<BlockedSite> =
        serde_json::from_str(sites_json).map_err(|e| format!("Invalid site list: {}", e))?;

    let mut translation = Translation {
        rules: Vec::new(),
        skipped_sites: 0,
        warnings: Vec::new(),
    };
    for (site_index, site) in sites.iter().enumerate() {
        if !site.enabled {
            translation.skipped_sites += 1;
            continue;
        }
        match to_provider_rules(site, site_index, format) {
            Ok(rules) => translation.rules.extend(rules),
            Err(e) => {
                translation.skipped_sites += 1;
                translation.warnings.push(format!("Skipping site '{}': {}", site.id, e));
            }
        }
    }
    Ok(translation)
}
