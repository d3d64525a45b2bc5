//! Test helpers shared by the workspace crates: an in-process mock upstream and a fixture
//! `OpenAPI` document shaped like the marketplace platform's.

use anyhow::Context as _;
use axum::Router;
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// An axum server bound to an ephemeral localhost port.
pub struct MockServer {
    pub base_url: String,
    pub addr: SocketAddr,
    shutdown_tx: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl MockServer {
    /// Serve `app` on `127.0.0.1:0`.
    ///
    /// # Errors
    ///
    /// Returns an error if the ephemeral port cannot be bound.
    pub async fn start(app: Router) -> anyhow::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .context("bind ephemeral port")?;
        let addr = listener.local_addr().context("local_addr")?;
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            let server = axum::serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            });
            let _ = server.await;
        });
        Ok(Self {
            base_url: format!("http://{addr}"),
            addr,
            shutdown_tx,
            handle,
        })
    }

    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
        let _ = self.handle.await;
    }
}

/// Records request targets (`path?query`) seen by a mock handler.
#[derive(Clone, Default)]
pub struct RequestLog(Arc<Mutex<Vec<String>>>);

impl RequestLog {
    pub fn record(&self, target: impl Into<String>) {
        if let Ok(mut v) = self.0.lock() {
            v.push(target.into());
        }
    }

    #[must_use]
    pub fn entries(&self) -> Vec<String> {
        self.0.lock().map(|v| v.clone()).unwrap_or_default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.lock().map(|v| v.len()).unwrap_or_default()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Marketplace-shaped spec: list envelopes, `allOf` composition, audit objects under varying
/// property names, a token listing endpoint and a resource without audit data.
pub const MARKETPLACE_SPEC_YAML: &str = r##"
openapi: 3.0.1
info:
  title: Marketplace fixture
  version: "1.0"
paths:
  /public/v1/catalog/products:
    get:
      operationId: listProducts
      summary: List products
      description: Products visible to the caller
      parameters:
        - name: status
          in: query
          schema:
            type: string
            enum: [Draft, Published, Unpublished]
        - name: name
          in: query
          description: Filter by name
          schema:
            type: string
            example: Teams
        - name: X-Trace
          in: header
          schema:
            type: string
      responses:
        "200":
          description: Product page
          content:
            application/json:
              schema:
                $ref: "#/components/schemas/ProductList"
  /public/v1/catalog/products/{id}:
    get:
      operationId: getProduct
      summary: Get product
      parameters:
        - name: id
          in: path
          required: true
          schema:
            type: string
      responses:
        "200":
          description: Product
          content:
            application/json:
              schema:
                $ref: "#/components/schemas/Product"
  /public/v1/commerce/orders:
    get:
      summary: List orders
      responses:
        "200":
          description: Order page
          content:
            application/json:
              schema:
                properties:
                  $meta:
                    $ref: "#/components/schemas/Meta"
                  data:
                    type: array
                    items:
                      $ref: "#/components/schemas/Order"
    post:
      summary: Create order
      responses:
        "201":
          description: Created
  /public/v1/commerce/orders/{orderId}/lines:
    get:
      summary: List order lines
      parameters:
        - name: orderId
          in: path
          required: true
          schema:
            type: string
      responses:
        "200":
          description: Lines
          content:
            application/json:
              schema:
                type: array
                items:
                  $ref: "#/components/schemas/Line"
  /public/v1/commerce/agreements:
    get:
      summary: List agreements
      responses:
        "200":
          description: Agreement page
          content:
            application/json:
              schema:
                type: object
                properties:
                  data:
                    type: array
                    items:
                      $ref: "#/components/schemas/Agreement"
  /public/v1/accounts/api-tokens:
    get:
      summary: List API tokens
      responses:
        "200":
          description: Token page
          content:
            application/json:
              schema:
                type: object
                properties:
                  data:
                    type: array
                    items:
                      $ref: "#/components/schemas/ApiToken"
  /public/v1/notifications/batches:
    post:
      summary: Create batch
      responses:
        "201":
          description: Created
components:
  schemas:
    Meta:
      type: object
      properties:
        pagination:
          type: object
          properties:
            offset: { type: integer }
            limit: { type: integer }
            total: { type: integer }
    ProductList:
      type: object
      properties:
        $meta:
          $ref: "#/components/schemas/Meta"
        data:
          type: array
          items:
            $ref: "#/components/schemas/Product"
    ProductBase:
      type: object
      properties:
        id: { type: string, example: PRD-1234-5678 }
        name: { type: string, description: Product name }
        status:
          type: string
          enum: [Draft, Published, Unpublished]
        audit:
          $ref: "#/components/schemas/ProductAudit"
    Product:
      allOf:
        - $ref: "#/components/schemas/ProductBase"
        - type: object
          properties:
            website: { type: string }
    ProductAudit:
      type: object
      properties:
        created:
          type: object
          properties:
            timestamp: { type: string, format: date-time }
            actor: { type: string }
        updated:
          $ref: "#/components/schemas/AuditEvent"
        published:
          type: object
          properties:
            date: { type: string, format: date-time }
    AuditEvent:
      type: object
      properties:
        at: { type: string, format: date-time }
        by:
          $ref: "#/components/schemas/Actor"
    Actor:
      type: object
      properties:
        id: { type: string }
        name: { type: string }
    Order:
      type: object
      properties:
        id: { type: string }
        status:
          type: string
          enum: [Draft, Querying, Processing, Completed, Failed]
        orderAudit:
          $ref: "#/components/schemas/OrderAudit"
        price:
          type: object
          properties:
            PPxM: { type: number }
    OrderAudit:
      type: object
      properties:
        created:
          $ref: "#/components/schemas/AuditEvent"
        updated:
          $ref: "#/components/schemas/AuditEvent"
        failed:
          type: object
          properties:
            at: { type: string, format: date-time }
        notes:
          type: string
    Line:
      type: object
      properties:
        id: { type: string }
        quantity: { type: integer }
    Agreement:
      type: object
      properties:
        id: { type: string }
        name: { type: string }
        status: { type: string }
    ApiToken:
      type: object
      properties:
        id: { type: string }
        name: { type: string }
        token: { type: string }
"##;

/// [`MARKETPLACE_SPEC_YAML`] as JSON.
///
/// # Panics
///
/// Panics if the embedded fixture stops parsing.
#[must_use]
pub fn marketplace_spec() -> Value {
    serde_yaml::from_str(MARKETPLACE_SPEC_YAML).expect("fixture spec parses")
}
