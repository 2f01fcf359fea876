use axum::{Json, http::HeaderMap};

use aide_types::api::GeoResponse;

use crate::plans::currency_for_country;

const COUNTRY_HEADERS: &[&str] = &["x-vercel-ip-country", "cf-ipcountry"];
const DEFAULT_COUNTRY: &str = "US";

/// Country of the caller as reported by the edge proxy.
pub fn country_from_headers(headers: &HeaderMap) -> String {
    COUNTRY_HEADERS
        .iter()
        .filter_map(|name| headers.get(*name).and_then(|v| v.to_str().ok()))
        .map(|v| v.trim().to_ascii_uppercase())
        .find(|v| v.len() == 2 && v.chars().all(|c| c.is_ascii_alphabetic()))
        .unwrap_or_else(|| DEFAULT_COUNTRY.to_string())
}

pub async fn geo(headers: HeaderMap) -> Json<GeoResponse> {
    let country = country_from_headers(&headers);
    Json(GeoResponse {
        currency: currency_for_country(&country).to_string(),
        country,
    })
}
