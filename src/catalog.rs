use crate::cache::SharedCache;
use crate::money::round_two;
use crate::printful::catalog::{self, CatalogProduct, ProductDetail};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

/// Product types offered in the store, in display order. Everything else
/// the provider carries is filtered out.
pub const ALLOWED_PRODUCT_TYPES: [&str; 6] = [
    "Canvas (in)",
    "Framed Canvas (in)",
    "Enhanced Matte Paper Poster (in)",
    "Enhanced Matte Paper Framed Poster (in)",
    "Framed Poster With Mat (cm)",
    "T-Shirt",
];

const CATALOG_TTL_SECS: u64 = 3600;
const PRODUCTS_KEY: &str = "catalog:products";

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("catalog unavailable: {0}")]
    Unavailable(String),
    #[error("unknown product: {0}")]
    UnknownProduct(i64),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreProduct {
    pub id: i64,
    pub title: String,
    pub type_name: String,
    pub image: Option<String>,
    pub variant_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreVariant {
    pub id: i64,
    pub product_id: i64,
    pub name: String,
    pub size: String,
    pub color: Option<String>,
    pub base_price: f64,
    pub selling_price: f64,
    pub in_stock: bool,
    pub image: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductListing {
    pub product: StoreProduct,
    pub variants: Vec<StoreVariant>,
}

/// Retail price from the provider's base price: 20% margin, floored to a
/// whole dollar, then priced at .95.
pub fn selling_price(base: f64) -> f64 {
    (base * 1.2).floor() + 0.95
}

/// Flat-rate shipping: a fifth of the selling price with a $5 floor.
pub fn shipping_cost(selling: f64) -> f64 {
    round_two((selling * 0.2).max(5.0))
}

fn allowed_rank(type_name: &str) -> Option<usize> {
    ALLOWED_PRODUCT_TYPES
        .iter()
        .position(|allowed| *allowed == type_name)
}

/// Provider seam for catalog reads so the resolver is testable offline.
#[async_trait]
pub trait CatalogSource: Send + Sync {
    async fn list_products(&self) -> Result<Vec<CatalogProduct>, String>;
    async fn product_detail(&self, product_id: i64) -> Result<ProductDetail, String>;
}

pub struct PrintfulCatalogSource;

#[async_trait]
impl CatalogSource for PrintfulCatalogSource {
    async fn list_products(&self) -> Result<Vec<CatalogProduct>, String> {
        catalog::fetch_catalog().await.map_err(|err| err.to_string())
    }

    async fn product_detail(&self, product_id: i64) -> Result<ProductDetail, String> {
        catalog::fetch_product_detail(product_id)
            .await
            .map_err(|err| err.to_string())
    }
}

/// Catalog reads with a one-hour cache in front of the provider. Filtering
/// and pricing happen on the way into the cache so every reader sees the
/// same shaped data.
pub struct CatalogResolver {
    source: Arc<dyn CatalogSource>,
    cache: SharedCache,
}

impl CatalogResolver {
    pub fn new(source: Arc<dyn CatalogSource>, cache: SharedCache) -> Self {
        Self { source, cache }
    }

    pub async fn products(&self) -> Result<Vec<StoreProduct>, CatalogError> {
        if let Some(cached) = self.cache.get::<Vec<StoreProduct>>(PRODUCTS_KEY).await {
            return Ok(cached);
        }

        let raw = self
            .source
            .list_products()
            .await
            .map_err(CatalogError::Unavailable)?;
        let mut offered: Vec<StoreProduct> = raw
            .into_iter()
            .filter(|product| !product.is_discontinued)
            .filter(|product| allowed_rank(&product.type_name).is_some())
            .map(|product| StoreProduct {
                id: product.id,
                title: product.title,
                type_name: product.type_name,
                image: product.image,
                variant_count: product.variant_count,
            })
            .collect();
        // Stable sort keeps the provider's relative order inside a type.
        offered.sort_by_key(|product| allowed_rank(&product.type_name));

        if offered.is_empty() {
            return Err(CatalogError::Unavailable(
                "no offerable products in provider catalog".into(),
            ));
        }

        info!(
            target = "printmuse.catalog",
            count = offered.len(),
            "catalog refreshed"
        );
        self.cache.set(PRODUCTS_KEY, &offered, CATALOG_TTL_SECS).await;
        Ok(offered)
    }

    pub async fn product_listing(&self, product_id: i64) -> Result<ProductListing, CatalogError> {
        let key = format!("catalog:variants:{product_id}");
        if let Some(cached) = self.cache.get::<ProductListing>(&key).await {
            return Ok(cached);
        }

        let detail = self
            .source
            .product_detail(product_id)
            .await
            .map_err(CatalogError::Unavailable)?;
        if detail.product.is_discontinued {
            return Err(CatalogError::UnknownProduct(product_id));
        }

        let variants: Vec<StoreVariant> = detail
            .variants
            .into_iter()
            .filter_map(|variant| {
                let base_price = match variant.price.parse::<f64>() {
                    Ok(price) => price,
                    Err(_) => {
                        warn!(
                            target = "printmuse.catalog",
                            variant_id = variant.id,
                            price = %variant.price,
                            "skipping variant with unparsable price"
                        );
                        return None;
                    }
                };
                Some(StoreVariant {
                    id: variant.id,
                    product_id: variant.product_id,
                    name: variant.name,
                    size: variant.size,
                    color: variant.color,
                    base_price,
                    selling_price: selling_price(base_price),
                    in_stock: variant.in_stock,
                    image: variant.image,
                })
            })
            .collect();

        let listing = ProductListing {
            product: StoreProduct {
                id: detail.product.id,
                title: detail.product.title,
                type_name: detail.product.type_name,
                image: detail.product.image,
                variant_count: detail.product.variant_count,
            },
            variants,
        };
        self.cache.set(&key, &listing, CATALOG_TTL_SECS).await;
        Ok(listing)
    }
}

const APPAREL_SIZE_ORDER: [&str; 9] = ["XS", "S", "M", "L", "XL", "2XL", "3XL", "4XL", "5XL"];

fn leading_dimension(size: &str) -> Option<u32> {
    let digits: String = size.chars().take_while(|c| c.is_ascii_digit()).collect();
    if size.contains('×') {
        digits.parse().ok()
    } else {
        None
    }
}

fn apparel_rank(size: &str) -> Option<usize> {
    APPAREL_SIZE_ORDER.iter().position(|known| *known == size)
}

fn size_sort_key(size: &str) -> (u8, u32, String) {
    if let Some(dimension) = leading_dimension(size) {
        return (0, dimension, size.to_string());
    }
    if let Some(rank) = apparel_rank(size) {
        return (1, rank as u32, size.to_string());
    }
    (2, 0, size.to_string())
}

fn is_square(size: &str) -> bool {
    let mut parts = size.split('×');
    let first: Option<u32> = parts
        .next()
        .map(|part| part.trim().chars().take_while(|c| c.is_ascii_digit()).collect::<String>())
        .and_then(|digits| digits.parse().ok());
    let second: Option<u32> = parts
        .next()
        .map(|part| part.trim().chars().take_while(|c| c.is_ascii_digit()).collect::<String>())
        .and_then(|digits| digits.parse().ok());
    matches!((first, second), (Some(w), Some(h)) if w == h)
}

/// Distinct sizes across the variants, in display order. `square_only`
/// drops rectangular print sizes but leaves apparel sizes alone.
pub fn size_options(variants: &[StoreVariant], square_only: bool) -> Vec<String> {
    let mut sizes: Vec<String> = Vec::new();
    for variant in variants {
        if !sizes.contains(&variant.size) {
            sizes.push(variant.size.clone());
        }
    }
    if square_only {
        sizes.retain(|size| leading_dimension(size).is_none() || is_square(size));
    }
    sizes.sort_by_key(|size| size_sort_key(size));
    sizes
}

/// Distinct colors across the variants in provider order. Variants with no
/// color collapse to a single "default" option.
pub fn color_options(variants: &[StoreVariant]) -> Vec<String> {
    let mut colors: Vec<String> = Vec::new();
    for variant in variants {
        let color = normalize_color(variant.color.as_deref());
        if !colors.contains(&color) {
            colors.push(color);
        }
    }
    colors
}

fn normalize_color(color: Option<&str>) -> String {
    color
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_lowercase)
        .unwrap_or_else(|| "default".to_string())
}

/// Exact-match variant selection on normalized color plus size. Out-of-stock
/// variants never match.
pub fn select_variant<'a>(
    variants: &'a [StoreVariant],
    color: Option<&str>,
    size: &str,
) -> Option<&'a StoreVariant> {
    let wanted = normalize_color(color);
    variants.iter().find(|variant| {
        variant.in_stock
            && variant.size == size
            && normalize_color(variant.color.as_deref()) == wanted
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn selling_price_floors_then_adds_ninety_five_cents() {
        assert_eq!(selling_price(10.0), 12.95);
        assert_eq!(selling_price(10.5), 12.95);
        assert_eq!(selling_price(25.0), 30.95);
    }

    #[test]
    fn shipping_is_fifth_of_price_with_floor() {
        assert_eq!(shipping_cost(30.95), 6.19);
        assert_eq!(shipping_cost(20.0), 5.0);
        assert_eq!(shipping_cost(12.95), 5.0);
    }

    #[test]
    fn sizes_order_dimensioned_then_apparel_then_unknown() {
        let variants: Vec<StoreVariant> = ["M", "12×16", "XS", "30×40", "2XL", "Custom"]
            .iter()
            .enumerate()
            .map(|(idx, size)| StoreVariant {
                id: idx as i64,
                product_id: 1,
                name: String::new(),
                size: size.to_string(),
                color: None,
                base_price: 10.0,
                selling_price: 12.95,
                in_stock: true,
                image: None,
            })
            .collect();
        assert_eq!(
            size_options(&variants, false),
            vec!["12×16", "30×40", "XS", "M", "2XL", "Custom"]
        );
    }

    #[test]
    fn square_filter_keeps_apparel_sizes() {
        let variants: Vec<StoreVariant> = ["12×16", "16×16", "M"]
            .iter()
            .enumerate()
            .map(|(idx, size)| StoreVariant {
                id: idx as i64,
                product_id: 1,
                name: String::new(),
                size: size.to_string(),
                color: None,
                base_price: 10.0,
                selling_price: 12.95,
                in_stock: true,
                image: None,
            })
            .collect();
        assert_eq!(size_options(&variants, true), vec!["16×16", "M"]);
    }

    #[test]
    fn variant_selection_normalizes_missing_color() {
        let variants = vec![
            StoreVariant {
                id: 1,
                product_id: 1,
                name: "Canvas 16×16".into(),
                size: "16×16".into(),
                color: None,
                base_price: 25.0,
                selling_price: 30.95,
                in_stock: true,
                image: None,
            },
            StoreVariant {
                id: 2,
                product_id: 2,
                name: "Tee M Black".into(),
                size: "M".into(),
                color: Some("Black".into()),
                base_price: 13.25,
                selling_price: 15.95,
                in_stock: false,
                image: None,
            },
        ];
        assert_eq!(select_variant(&variants, None, "16×16").map(|v| v.id), Some(1));
        assert_eq!(
            select_variant(&variants, Some("default"), "16×16").map(|v| v.id),
            Some(1)
        );
        // Out of stock never matches, even on exact color and size.
        assert!(select_variant(&variants, Some("black"), "M").is_none());
    }

    struct CountingSource {
        calls: AtomicU32,
    }

    #[async_trait]
    impl CatalogSource for CountingSource {
        async fn list_products(&self) -> Result<Vec<CatalogProduct>, String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let raw = r#"[
                {"id": 3, "title": "Tee", "type_name": "T-Shirt", "variant_count": 10, "is_discontinued": false},
                {"id": 1, "title": "Canvas", "type_name": "Canvas (in)", "variant_count": 8, "is_discontinued": false},
                {"id": 9, "title": "Mug", "type_name": "Mug", "variant_count": 2, "is_discontinued": false},
                {"id": 4, "title": "Old Canvas", "type_name": "Canvas (in)", "variant_count": 3, "is_discontinued": true}
            ]"#;
            Ok(serde_json::from_str(raw).unwrap())
        }

        async fn product_detail(&self, _product_id: i64) -> Result<ProductDetail, String> {
            Err("not used".into())
        }
    }

    #[tokio::test]
    async fn catalog_filters_sorts_and_caches() {
        let source = Arc::new(CountingSource {
            calls: AtomicU32::new(0),
        });
        let resolver = CatalogResolver::new(source.clone(), SharedCache::in_memory());

        let products = resolver.products().await.unwrap();
        let ids: Vec<i64> = products.iter().map(|p| p.id).collect();
        // Canvas sorts ahead of T-Shirt; mug and discontinued canvas are gone.
        assert_eq!(ids, vec![1, 3]);

        resolver.products().await.unwrap();
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    struct EmptySource;

    #[async_trait]
    impl CatalogSource for EmptySource {
        async fn list_products(&self) -> Result<Vec<CatalogProduct>, String> {
            Ok(Vec::new())
        }

        async fn product_detail(&self, _product_id: i64) -> Result<ProductDetail, String> {
            Err("not used".into())
        }
    }

    #[tokio::test]
    async fn empty_catalog_is_unavailable() {
        let resolver = CatalogResolver::new(Arc::new(EmptySource), SharedCache::in_memory());
        let err = resolver.products().await.unwrap_err();
        assert!(matches!(err, CatalogError::Unavailable(_)));
    }
}
