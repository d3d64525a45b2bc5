//! Ready-made queries for the most common marketplace tasks.

use serde::Serialize;
use serde_json::{Value, json};

#[derive(Debug, Serialize)]
struct Template {
    name: &'static str,
    description: &'static str,
    query: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    available_statuses: Option<&'static [&'static str]>,
    use_case: &'static str,
}

#[derive(Debug, Serialize)]
struct TemplateGroup {
    description: &'static str,
    templates: &'static [Template],
}

const fn t(
    name: &'static str,
    description: &'static str,
    query: &'static str,
    use_case: &'static str,
) -> Template {
    Template {
        name,
        description,
        query,
        available_statuses: None,
        use_case,
    }
}

const fn with_statuses(mut template: Template, statuses: &'static [&'static str]) -> Template {
    template.available_statuses = Some(statuses);
    template
}

const ORDERS: &[Template] = &[
    t(
        "Recent orders",
        "Get the most recently created orders",
        "marketplace_query(resource='commerce.orders', order='-audit.created.at', limit=20)",
        "Monitor new orders coming in",
    ),
    with_statuses(
        t(
            "Orders by status",
            "Filter orders by their current status",
            "marketplace_query(resource='commerce.orders', rql='eq(status,Querying)', limit=50)",
            "Track orders in a specific state",
        ),
        &["Draft", "Querying", "Processing", "Completed", "Failed", "Cancelled"],
    ),
    t(
        "Recent completed orders",
        "Get recently completed orders",
        "marketplace_query(resource='commerce.orders', rql='eq(status,Completed)', order='-audit.updated.at', limit=20)",
        "Review recently fulfilled orders",
    ),
    t(
        "Orders for specific product",
        "Find all orders containing a specific product",
        "marketplace_query(resource='commerce.orders', rql='eq(product.id,PRD-xxxx-xxxx)', limit=50)",
        "Track orders for a particular product",
    ),
    t(
        "Large orders",
        "Find orders above a certain value",
        "marketplace_query(resource='commerce.orders', rql='gt(price.PPxM,1000)', order='-price.PPxM', limit=20)",
        "Identify high-value orders",
    ),
];

const PRODUCTS: &[Template] = &[
    with_statuses(
        t(
            "Published products",
            "Get all published products",
            "marketplace_query(resource='catalog.products', rql='eq(status,Published)', limit=50)",
            "See what's currently available in the catalog",
        ),
        &["Draft", "Published", "Unpublished"],
    ),
    t(
        "Products by vendor",
        "Find all products from a specific vendor",
        "marketplace_query(resource='catalog.products', rql='eq(vendor.id,ACC-xxxx-xxxx)', limit=50)",
        "View a vendor's product catalog",
    ),
    t(
        "Search products by name",
        "Search for products containing specific keywords",
        "marketplace_query(resource='catalog.products', rql='ilike(name,*Microsoft*)', limit=50)",
        "Find products matching search terms",
    ),
    t(
        "Recently updated products",
        "Get products that were recently modified",
        "marketplace_query(resource='catalog.products', order='-audit.updated.at', limit=20)",
        "Monitor product catalog changes",
    ),
    t(
        "Products with items",
        "Find products that have available items",
        "marketplace_query(resource='catalog.products', rql='gt(statistics.itemCount,0)', limit=50)",
        "See products ready for ordering",
    ),
];

const AGREEMENTS: &[Template] = &[
    with_statuses(
        t(
            "Active agreements",
            "Get all active agreements",
            "marketplace_query(resource='commerce.agreements', rql='eq(status,Active)', limit=50)",
            "View current active agreements",
        ),
        &["Draft", "Active", "Terminated"],
    ),
    t(
        "Agreements by client",
        "Find all agreements for a specific client",
        "marketplace_query(resource='commerce.agreements', rql='eq(client.id,ACC-xxxx-xxxx)', limit=50)",
        "Review a client's agreements",
    ),
    t(
        "Recent agreements",
        "Get recently created agreements",
        "marketplace_query(resource='commerce.agreements', order='-audit.created.at', limit=20)",
        "Monitor new agreements",
    ),
];

const SUBSCRIPTIONS: &[Template] = &[
    with_statuses(
        t(
            "Active subscriptions",
            "Get all active subscriptions",
            "marketplace_query(resource='commerce.subscriptions', rql='eq(status,Active)', limit=50)",
            "View current active subscriptions",
        ),
        &["Active", "Updating", "Terminating", "Terminated"],
    ),
    t(
        "Subscriptions by product",
        "Find subscriptions for a specific product",
        "marketplace_query(resource='commerce.subscriptions', rql='eq(product.id,PRD-xxxx-xxxx)', limit=50)",
        "Track subscriptions for a product",
    ),
    t(
        "Expiring soon",
        "Find subscriptions ending in the next 30 days",
        "marketplace_query(resource='commerce.subscriptions', rql='and(eq(status,Active),lt(endDate,2024-12-31))', order='+endDate', limit=50)",
        "Proactive renewal management",
    ),
];

const ACCOUNTS: &[Template] = &[
    with_statuses(
        t(
            "Active buyers",
            "Get all active buyer accounts",
            "marketplace_query(resource='accounts.buyers', rql='eq(status,Active)', limit=50)",
            "View active buyer accounts",
        ),
        &["Active", "Inactive"],
    ),
    t(
        "Search buyers by name",
        "Find buyers matching search terms",
        "marketplace_query(resource='accounts.buyers', rql='ilike(name,*Corp*)', limit=50)",
        "Locate specific buyer accounts",
    ),
    t(
        "Recent users",
        "Get recently created users",
        "marketplace_query(resource='accounts.users', order='-audit.created.at', limit=20)",
        "Monitor new user registrations",
    ),
];

/// Static query templates grouped by domain, plus usage tips.
#[must_use]
pub fn quick_queries() -> Value {
    let group = |description, templates| TemplateGroup {
        description,
        templates,
    };
    json!({
        "orders": group("Common order queries", ORDERS),
        "products": group("Common product queries", PRODUCTS),
        "agreements": group("Common agreement queries", AGREEMENTS),
        "subscriptions": group("Common subscription queries", SUBSCRIPTIONS),
        "accounts": group("Common account queries", ACCOUNTS),
        "tips": {
            "how_to_use": [
                "1. Copy the query from the template",
                "2. Replace placeholder values (xxxx-xxxx) with actual IDs",
                "3. Adjust limit parameter based on your needs",
                "4. Modify RQL filters to match your specific criteria",
            ],
            "rql_basics": {
                "equality": "eq(field,value) - Exact match",
                "search": "ilike(field,*keyword*) - Case-insensitive search",
                "comparison": "gt(field,value) - Greater than, lt(field,value) - Less than",
                "combine": "and(condition1,condition2) - Multiple conditions",
                "sorting": "order='-field' for descending, order='+field' for ascending",
            },
        },
    })
}
