//! Default values for the configuration structs

pub fn default_image_budget_mb() -> u64 {
    50
}

pub fn default_listing_ttl() -> String {
    "6h".to_string()
}

pub fn default_negative_cooldown() -> String {
    "30m".to_string()
}

pub fn default_epg_expiration() -> String {
    "1h".to_string()
}

pub fn default_connect_timeout() -> String {
    "10s".to_string()
}

pub fn default_request_timeout() -> String {
    "30s".to_string()
}

pub fn default_max_retries() -> u32 {
    2
}
