//! OpenAPI document served at `/api-docs/openapi.json`, browsable at `/swagger-ui`.

use utoipa::OpenApi;

use crate::domain::{Processor, Transaction, TransactionFlags, TransactionStatus};
use crate::handlers::webhook::WebhookAck;
use crate::health::{DependencyStatus, HealthResponse};
use crate::services::balance_cache::CachedBalance;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Cores Reconciler",
        description = "Reconciles payment provider webhooks into cores purchases and ledger transfers."
    ),
    paths(
        crate::handlers::health,
        crate::handlers::webhook::paddle,
        crate::handlers::transactions::list_transactions,
        crate::handlers::transactions::get_transaction,
        crate::handlers::balance::get_balance,
    ),
    components(schemas(
        Transaction,
        TransactionStatus,
        TransactionFlags,
        Processor,
        CachedBalance,
        WebhookAck,
        HealthResponse,
        DependencyStatus,
    )),
    tags(
        (name = "Webhooks", description = "Payment provider notifications"),
        (name = "Transactions", description = "Purchase records"),
        (name = "Balances", description = "Cached ledger balances"),
        (name = "Health", description = "Dependency checks")
    )
)]
pub struct ApiDoc;
