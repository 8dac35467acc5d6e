//! Demo inventory toolset served by the CLI.
//!
//! Three tools over an in-memory stock table:
//!
//! - `getInventory`: lists products, optionally only those low on stock
//! - `getProduct`: looks up one product by SKU
//! - `adjustStock`: changes a product's quantity; gated behind the
//!   `inventory-write-tools` flag

use std::{collections::BTreeMap, sync::Arc};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use toolmetry_core::{ToolDefinition, ToolError, ToolGate, typed};
use toolmetry_runtime::RuntimeBuilder;

/// Flag that exposes the write tools.
pub const WRITE_TOOLS_FLAG: &str = "inventory-write-tools";

const LOW_STOCK_THRESHOLD: u32 = 5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Product {
    pub sku: String,
    pub name: String,
    pub quantity: u32,
}

#[derive(Debug, Default, Deserialize, JsonSchema)]
pub struct GetInventoryInput {
    /// Only return products with fewer than 5 units in stock.
    #[serde(default)]
    pub low_stock_only: bool,
}

#[derive(Debug, Serialize)]
pub struct InventoryOutput {
    pub items: Vec<Product>,
    pub total_units: u64,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct GetProductInput {
    /// Stock keeping unit, e.g. `A1`.
    pub sku: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct AdjustStockInput {
    pub sku: String,
    /// Units to add (positive) or remove (negative).
    pub delta: i64,
}

/// In-memory stock table shared by the tools.
#[derive(Debug, Default)]
pub struct Inventory {
    products: RwLock<BTreeMap<String, Product>>,
}

impl Inventory {
    pub fn with_products(products: impl IntoIterator<Item = Product>) -> Self {
        let products = products
            .into_iter()
            .map(|product| (product.sku.clone(), product))
            .collect();
        Self {
            products: RwLock::new(products),
        }
    }

    /// Stock the demo server starts with.
    pub fn sample() -> Self {
        Self::with_products([
            product("A1", "Anvil", 12),
            product("B7", "Bolt cutter", 3),
            product("C3", "Crowbar", 0),
            product("D2", "Drill", 27),
        ])
    }

    pub async fn list(&self, low_stock_only: bool) -> InventoryOutput {
        let products = self.products.read().await;
        let items: Vec<_> = products
            .values()
            .filter(|product| !low_stock_only || product.quantity < LOW_STOCK_THRESHOLD)
            .cloned()
            .collect();
        let total_units = items.iter().map(|product| u64::from(product.quantity)).sum();
        InventoryOutput { items, total_units }
    }

    /// # Errors
    ///
    /// Returns [`ToolError::NotFound`] for an unknown SKU.
    pub async fn product(&self, sku: &str) -> Result<Product, ToolError> {
        self.products
            .read()
            .await
            .get(sku)
            .cloned()
            .ok_or_else(|| ToolError::not_found(format!("product {sku} not found")))
    }

    /// # Errors
    ///
    /// Returns [`ToolError::NotFound`] for an unknown SKU and
    /// [`ToolError::InvalidArguments`] if the adjustment would leave the
    /// quantity negative or overflow it.
    pub async fn adjust(&self, sku: &str, delta: i64) -> Result<Product, ToolError> {
        let mut products = self.products.write().await;
        let product = products
            .get_mut(sku)
            .ok_or_else(|| ToolError::not_found(format!("product {sku} not found")))?;

        let adjusted = i64::from(product.quantity)
            .checked_add(delta)
            .and_then(|quantity| u32::try_from(quantity).ok())
            .ok_or_else(|| {
                ToolError::invalid_arguments(format!(
                    "cannot adjust {sku} by {delta}: {} in stock",
                    product.quantity
                ))
            })?;

        product.quantity = adjusted;
        Ok(product.clone())
    }
}

fn product(sku: &str, name: &str, quantity: u32) -> Product {
    Product {
        sku: sku.to_string(),
        name: name.to_string(),
        quantity,
    }
}

/// Adds the inventory tools to `builder` as candidates.
pub fn register(builder: RuntimeBuilder, inventory: Arc<Inventory>) -> RuntimeBuilder {
    let list_inventory = Arc::clone(&inventory);
    let get_product = Arc::clone(&inventory);
    let adjust_stock = inventory;

    builder
        .with_tool(
            ToolDefinition::for_input::<GetInventoryInput>("getInventory")
                .with_title("Get inventory")
                .with_description("Lists products and their stock levels."),
            typed(move |input: GetInventoryInput| {
                let inventory = Arc::clone(&list_inventory);
                async move { Ok::<_, ToolError>(inventory.list(input.low_stock_only).await) }
            }),
        )
        .with_tool(
            ToolDefinition::for_input::<GetProductInput>("getProduct")
                .with_title("Get product")
                .with_description("Looks up a single product by SKU."),
            typed(move |input: GetProductInput| {
                let inventory = Arc::clone(&get_product);
                async move { inventory.product(&input.sku).await }
            }),
        )
        .with_tool(
            ToolDefinition::for_input::<AdjustStockInput>("adjustStock")
                .with_title("Adjust stock")
                .with_description("Adds or removes units of a product.")
                .with_gate(ToolGate::flag(WRITE_TOOLS_FLAG)),
            typed(move |input: AdjustStockInput| {
                let inventory = Arc::clone(&adjust_stock);
                async move { inventory.adjust(&input.sku, input.delta).await }
            }),
        )
}
