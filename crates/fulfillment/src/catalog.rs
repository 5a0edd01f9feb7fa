//! Catalog lookups shared by the pipeline stages.

use std::collections::HashMap;

use domain::{CatalogProduct, OrderComposition, OrderItem, ProductId};
use order_store::OrderStore;

use crate::error::Result;

/// Catalog records for the products referenced by `items`, keyed by id.
pub(crate) async fn products_for(
    store: &dyn OrderStore,
    items: &[OrderItem],
) -> Result<HashMap<ProductId, CatalogProduct>> {
    let ids: Vec<ProductId> = items.iter().map(|i| i.product_id.clone()).collect();
    Ok(store
        .get_products(&ids)
        .await?
        .into_iter()
        .map(|p| (p.id.clone(), p))
        .collect())
}

/// True if the catalog has a digital file for the item's product.
///
/// Items whose product is missing from the catalog count as physical.
pub(crate) fn is_digital(products: &HashMap<ProductId, CatalogProduct>, item: &OrderItem) -> bool {
    products
        .get(&item.product_id)
        .is_some_and(CatalogProduct::is_digital)
}

pub(crate) fn composition(
    products: &HashMap<ProductId, CatalogProduct>,
    items: &[OrderItem],
) -> OrderComposition {
    OrderComposition::classify(items, |item| is_digital(products, item))
}
