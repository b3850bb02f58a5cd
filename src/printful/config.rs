use once_cell::sync::Lazy;
use std::env;

pub static PRINTFUL_API_KEY: Lazy<String> =
    Lazy::new(|| env::var("PRINTFUL_API_KEY").unwrap_or_default());

pub static ROOT: Lazy<String> = Lazy::new(|| {
    env::var("PRINTFUL_BASE_URL").unwrap_or_else(|_| "https://api.printful.com".to_string())
});
