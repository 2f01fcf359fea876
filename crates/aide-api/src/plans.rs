use crate::config::StripeConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    pub billing_cycle: &'static str,
    pub label: &'static str,
    pub price_id: String,
}

pub fn plans(config: &StripeConfig) -> [Plan; 2] {
    [
        Plan {
            billing_cycle: "monthly",
            label: "Monthly",
            price_id: config.price_monthly.clone(),
        },
        Plan {
            billing_cycle: "yearly",
            label: "Yearly",
            price_id: config.price_yearly.clone(),
        },
    ]
}

pub fn plan_for_cycle(config: &StripeConfig, billing_cycle: &str) -> Option<Plan> {
    plans(config)
        .into_iter()
        .find(|p| p.billing_cycle == billing_cycle && !p.price_id.is_empty())
}

pub fn plan_label(config: &StripeConfig, price_id: Option<&str>) -> &'static str {
    price_id
        .and_then(|id| plans(config).into_iter().find(|p| p.price_id == id))
        .map(|p| p.label)
        .unwrap_or("Unknown plan")
}

const EURO_AREA: &[&str] = &[
    "AT", "BE", "CY", "DE", "EE", "ES", "FI", "FR", "GR", "HR", "IE", "IT", "LT", "LU", "LV", "MT",
    "NL", "PT", "SI", "SK",
];

/// Display/checkout currency for an ISO country code.
pub fn currency_for_country(country: &str) -> &'static str {
    match country.to_ascii_uppercase().as_str() {
        "MY" => "myr",
        "SG" => "sgd",
        "GB" => "gbp",
        "AU" => "aud",
        c if EURO_AREA.contains(&c) => "eur",
        _ => "usd",
    }
}

pub fn payment_methods(currency: &str) -> &'static [&'static str] {
    match currency {
        "myr" => &["card", "fpx", "grabpay"],
        "sgd" => &["card", "paynow"],
        _ => &["card"],
    }
}
