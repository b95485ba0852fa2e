//! Invoices.
//!
//! An admin issues an invoice directly (it starts out `sent`), or a client
//! asks for one (`requested`) and an admin later fills in the amount and
//! sends it. Only a sent invoice can be paid, and a paid one never changes
//! again.

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::{NaiveDate, Utc};
use rand::Rng;
use uuid::Uuid;

use stackline_codec::obfuscate;
use stackline_db::models::InvoiceRow;
use stackline_db::queries::invoices::NewInvoice;
use stackline_types::api::{
    Claims, CreateInvoiceRequest, InvoiceResponse, RequestInvoiceRequest, SendInvoiceRequest,
};
use stackline_types::events::GatewayEvent;
use stackline_types::models::InvoiceStatus;

use crate::audit::{self, actions};
use crate::auth::AppState;
use crate::blocking;
use crate::convert::invoice_response;
use crate::error::{ApiError, ValidationErrorBuilder};
use crate::middleware::{ClientMeta, require_admin, require_owner_or_admin};
use crate::validation::{MAX_TEXT_LEN, sanitize_text, validate_required};

pub const DEFAULT_CURRENCY: &str = "USD";

const REFERENCE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const REFERENCE_SUFFIX_LEN: usize = 6;

/// `INV-YYYYMMDD-XXXXXX`
pub fn generate_reference(day: NaiveDate) -> String {
    let mut rng = rand::rng();
    let suffix: String = (0..REFERENCE_SUFFIX_LEN)
        .map(|_| REFERENCE_ALPHABET[rng.random_range(0..REFERENCE_ALPHABET.len())] as char)
        .collect();
    format!("INV-{}-{}", day.format("%Y%m%d"), suffix)
}

fn today() -> NaiveDate {
    Utc::now().date_naive()
}

fn to_response(row: &InvoiceRow) -> InvoiceResponse {
    invoice_response(row, today())
}

fn validate_amount(amount_cents: i64) -> Result<(), String> {
    if amount_cents < 0 {
        return Err("Amount cannot be negative".to_string());
    }
    Ok(())
}

fn normalize_currency(raw: Option<&str>) -> Result<String, String> {
    let currency = raw.map(str::trim).filter(|c| !c.is_empty()).unwrap_or(DEFAULT_CURRENCY);
    let currency = currency.to_ascii_uppercase();
    if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err("Currency must be a three-letter code".to_string());
    }
    Ok(currency)
}

async fn load(state: &AppState, invoice_id: Uuid) -> Result<InvoiceRow, ApiError> {
    let id = invoice_id.to_string();
    blocking::run(state, move |db| db.get_invoice(&id))
        .await?
        .ok_or_else(|| ApiError::not_found("Invoice not found"))
}

async fn insert(state: &AppState, invoice: OwnedInvoice) -> Result<InvoiceResponse, ApiError> {
    let id = Uuid::new_v4().to_string();
    let reference = generate_reference(today());
    let row = blocking::run(state, move |db| {
        db.insert_invoice(&NewInvoice {
            id: &id,
            user_id: &invoice.user_id,
            reference: &reference,
            amount_cents: invoice.amount_cents,
            currency: &invoice.currency,
            due_date: invoice.due_date,
            description: &invoice.description,
            status: invoice.status,
        })?;
        db.get_invoice(&id)
    })
    .await?
    .ok_or_else(|| ApiError::internal("invoice vanished after insert"))?;
    Ok(to_response(&row))
}

struct OwnedInvoice {
    user_id: String,
    amount_cents: i64,
    currency: String,
    due_date: Option<NaiveDate>,
    description: String,
    status: InvoiceStatus,
}

/// Clients see their own invoices, admins see all.
pub async fn list_invoices(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<InvoiceResponse>>, ApiError> {
    let owner = (!claims.is_admin()).then(|| claims.sub.to_string());
    let rows = blocking::run(&state, move |db| db.list_invoices(owner.as_deref())).await?;
    let today = today();
    Ok(Json(rows.iter().map(|row| invoice_response(row, today)).collect()))
}

/// Admin-issued invoice, sent straight away.
pub async fn create_invoice(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    meta: ClientMeta,
    Json(req): Json<CreateInvoiceRequest>,
) -> Result<impl IntoResponse, ApiError> {
    require_admin(&claims)?;

    let description = sanitize_text(&req.description);
    let mut errors = ValidationErrorBuilder::new();
    errors.check("amount_cents", validate_amount(req.amount_cents));
    errors.check(
        "description",
        validate_required("Description", &description, MAX_TEXT_LEN),
    );
    let currency = match normalize_currency(req.currency.as_deref()) {
        Ok(currency) => currency,
        Err(msg) => {
            errors.add("currency", msg);
            String::new()
        }
    };
    errors.finish()?;

    let user_id = req.user_id.to_string();
    let lookup = user_id.clone();
    if blocking::run(&state, move |db| db.get_user_by_id(&lookup)).await?.is_none() {
        return Err(ApiError::validation_field("user_id", "Unknown user"));
    }

    let invoice = insert(
        &state,
        OwnedInvoice {
            user_id,
            amount_cents: req.amount_cents,
            currency,
            due_date: req.due_date,
            description: obfuscate(&description),
            status: InvoiceStatus::Sent,
        },
    )
    .await?;

    audit::record(
        &state,
        Some(claims.sub),
        actions::INVOICE_CREATE,
        serde_json::json!({
            "invoice_id": invoice.id,
            "reference": invoice.reference,
            "user_id": invoice.user_id,
            "amount_cents": invoice.amount_cents,
        }),
        meta.ip,
    )
    .await;
    state.dispatcher.broadcast(GatewayEvent::InvoiceCreated {
        invoice: invoice.clone(),
    });

    Ok((StatusCode::CREATED, Json(invoice)))
}

/// A client asks to be billed. The admin sets the final amount when sending.
pub async fn request_invoice(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    meta: ClientMeta,
    Json(req): Json<RequestInvoiceRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let description = sanitize_text(&req.description);
    let amount_cents = req.amount_cents.unwrap_or(0);

    let mut errors = ValidationErrorBuilder::new();
    errors.check("amount_cents", validate_amount(amount_cents));
    errors.check(
        "description",
        validate_required("Description", &description, MAX_TEXT_LEN),
    );
    errors.finish()?;

    let invoice = insert(
        &state,
        OwnedInvoice {
            user_id: claims.sub.to_string(),
            amount_cents,
            currency: DEFAULT_CURRENCY.to_string(),
            due_date: None,
            description: obfuscate(&description),
            status: InvoiceStatus::Requested,
        },
    )
    .await?;

    audit::record(
        &state,
        Some(claims.sub),
        actions::INVOICE_REQUEST,
        serde_json::json!({ "invoice_id": invoice.id, "reference": invoice.reference }),
        meta.ip,
    )
    .await;
    state.dispatcher.broadcast(GatewayEvent::InvoiceCreated {
        invoice: invoice.clone(),
    });

    Ok((StatusCode::CREATED, Json(invoice)))
}

pub async fn send_invoice(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(invoice_id): Path<Uuid>,
    meta: ClientMeta,
    body: Option<Json<SendInvoiceRequest>>,
) -> Result<Json<InvoiceResponse>, ApiError> {
    require_admin(&claims)?;

    let req = body.map(|Json(req)| req).unwrap_or_default();
    if let Some(amount) = req.amount_cents {
        validate_amount(amount).map_err(|msg| ApiError::validation_field("amount_cents", msg))?;
    }

    let current = load(&state, invoice_id).await?;
    if to_response(&current).status != InvoiceStatus::Requested {
        return Err(ApiError::conflict("Only a requested invoice can be sent"));
    }

    let id = invoice_id.to_string();
    let (amount, due) = (req.amount_cents, req.due_date);
    let row = blocking::run(&state, move |db| {
        if !db.send_invoice(&id, amount, due)? {
            return Ok(None);
        }
        db.get_invoice(&id)
    })
    .await?
    .ok_or_else(|| ApiError::conflict("Only a requested invoice can be sent"))?;

    let invoice = to_response(&row);
    audit::record(
        &state,
        Some(claims.sub),
        actions::INVOICE_SEND,
        serde_json::json!({ "invoice_id": invoice.id, "amount_cents": invoice.amount_cents }),
        meta.ip,
    )
    .await;
    state.dispatcher.broadcast(GatewayEvent::InvoiceUpdated {
        invoice: invoice.clone(),
    });

    Ok(Json(invoice))
}

/// Settle a sent invoice. Owner or admin.
pub async fn pay_invoice(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(invoice_id): Path<Uuid>,
    meta: ClientMeta,
) -> Result<Json<InvoiceResponse>, ApiError> {
    let current = load(&state, invoice_id).await?;
    require_owner_or_admin(&claims, &current.user_id)?;

    let status = to_response(&current).status;
    if status != InvoiceStatus::Sent {
        return Err(ApiError::conflict(format!(
            "A {} invoice cannot be paid",
            status
        )));
    }

    let id = invoice_id.to_string();
    let paid_at = Utc::now();
    let row = blocking::run(&state, move |db| {
        if !db.mark_invoice_paid(&id, paid_at)? {
            return Ok(None);
        }
        db.get_invoice(&id)
    })
    .await?
    .ok_or_else(|| ApiError::conflict("Invoice is no longer payable"))?;

    let invoice = to_response(&row);
    audit::record(
        &state,
        Some(claims.sub),
        actions::INVOICE_PAY,
        serde_json::json!({ "invoice_id": invoice.id, "reference": invoice.reference }),
        meta.ip,
    )
    .await;
    state.dispatcher.broadcast(GatewayEvent::InvoicePaid {
        invoice: invoice.clone(),
    });

    Ok(Json(invoice))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{TestApp, body_json};
    use axum::http::Method;

    #[test]
    fn reference_has_date_and_suffix() {
        let day = NaiveDate::from_ymd_opt(2026, 3, 9).unwrap();
        let reference = generate_reference(day);
        assert!(reference.starts_with("INV-20260309-"));
        let suffix = &reference["INV-20260309-".len()..];
        assert_eq!(suffix.len(), REFERENCE_SUFFIX_LEN);
        assert!(suffix.bytes().all(|b| REFERENCE_ALPHABET.contains(&b)));
    }

    #[test]
    fn currency_is_normalized() {
        assert_eq!(normalize_currency(None).unwrap(), "USD");
        assert_eq!(normalize_currency(Some(" eur ")).unwrap(), "EUR");
        assert!(normalize_currency(Some("euro")).is_err());
        assert!(normalize_currency(Some("E1R")).is_err());
    }

    #[tokio::test]
    async fn issued_invoice_can_be_paid_once() {
        let app = TestApp::new();
        let (_, admin) = app.admin("root@example.com");
        let (jane_id, jane) = app.client("jane@example.com");

        let resp = app
            .post(
                "/api/admin/invoices",
                Some(admin.as_str()),
                serde_json::json!({
                    "user_id": jane_id,
                    "amount_cents": 129900,
                    "currency": "eur",
                    "due_date": "2099-01-31",
                    "description": "Website build, phase 1",
                }),
            )
            .await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let invoice = body_json(resp).await;
        assert_eq!(invoice["status"], "sent");
        assert_eq!(invoice["currency"], "EUR");
        assert_eq!(invoice["description"], "Website build, phase 1");
        assert_eq!(invoice["overdue"], false);

        let uri = format!("/api/invoices/{}/pay", invoice["id"].as_str().unwrap());
        let mut rx = app.state.dispatcher.subscribe();
        let resp = app.request(Method::POST, &uri, Some(jane.as_str()), None).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let paid = body_json(resp).await;
        assert_eq!(paid["status"], "Paid");
        assert!(paid["paid_at"].is_string());
        assert_eq!(rx.recv().await.unwrap().name, "new_audit_log");
        assert_eq!(rx.recv().await.unwrap().name, "invoice_paid");

        let resp = app.request(Method::POST, &uri, Some(jane.as_str()), None).await;
        assert_eq!(resp.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn requested_invoice_goes_through_send() {
        let app = TestApp::new();
        let (_, admin) = app.admin("root@example.com");
        let (_, jane) = app.client("jane@example.com");

        let resp = app
            .post(
                "/api/invoices/request",
                Some(jane.as_str()),
                serde_json::json!({ "description": "Hosting for Q3" }),
            )
            .await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let invoice = body_json(resp).await;
        assert_eq!(invoice["status"], "requested");
        assert_eq!(invoice["amount_cents"], 0);
        let id = invoice["id"].as_str().unwrap().to_string();

        // Not payable until sent
        let resp = app
            .request(Method::POST, &format!("/api/invoices/{}/pay", id), Some(jane.as_str()), None)
            .await;
        assert_eq!(resp.status(), StatusCode::CONFLICT);

        let send = format!("/api/admin/invoices/{}/send", id);
        let resp = app
            .post(&send, Some(jane.as_str()), serde_json::json!({ "amount_cents": 4500 }))
            .await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);

        let resp = app
            .post(
                &send,
                Some(admin.as_str()),
                serde_json::json!({ "amount_cents": 4500, "due_date": "2000-01-01" }),
            )
            .await;
        assert_eq!(resp.status(), StatusCode::OK);
        let sent = body_json(resp).await;
        assert_eq!(sent["status"], "sent");
        assert_eq!(sent["amount_cents"], 4500);
        assert_eq!(sent["overdue"], true);

        let resp = app.request(Method::POST, &send, Some(admin.as_str()), None).await;
        assert_eq!(resp.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn create_validates_input() {
        let app = TestApp::new();
        let (_, admin) = app.admin("root@example.com");
        let (jane_id, _) = app.client("jane@example.com");

        let resp = app
            .post(
                "/api/admin/invoices",
                Some(admin.as_str()),
                serde_json::json!({
                    "user_id": jane_id,
                    "amount_cents": -1,
                    "currency": "dollars",
                    "description": " ",
                }),
            )
            .await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body = body_json(resp).await;
        assert_eq!(body["details"].as_object().unwrap().len(), 3);

        let resp = app
            .post(
                "/api/admin/invoices",
                Some(admin.as_str()),
                serde_json::json!({
                    "user_id": Uuid::new_v4(),
                    "amount_cents": 100,
                    "description": "Orphan",
                }),
            )
            .await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn invoices_are_scoped_to_owner() {
        let app = TestApp::new();
        let (_, admin) = app.admin("root@example.com");
        let (_, jane) = app.client("jane@example.com");
        let (_, sam) = app.client("sam@example.com");

        let invoice = body_json(
            app.post(
                "/api/invoices/request",
                Some(jane.as_str()),
                serde_json::json!({ "description": "Logo work", "amount_cents": 20000 }),
            )
            .await,
        )
        .await;

        let theirs = body_json(app.get("/api/invoices", Some(sam.as_str())).await).await;
        assert!(theirs.as_array().unwrap().is_empty());
        let all = body_json(app.get("/api/invoices", Some(admin.as_str())).await).await;
        assert_eq!(all.as_array().unwrap().len(), 1);

        let resp = app
            .request(
                Method::POST,
                &format!("/api/invoices/{}/pay", invoice["id"].as_str().unwrap()),
                Some(sam.as_str()),
                None,
            )
            .await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }
}
