use actix_web::{HttpResponse, Responder, route, web};
use serde_json::{Value, json};

use super::{ErrorResponse, invalid_argument};
use crate::aggregator::{Aggregator, Delivery};
use crate::sandbox::SandboxReport;

/// Receives one finished sandbox job. Judge0 calls back with PUT.
///
/// Any payload carrying a token is acknowledged with 200, unknown tokens and
/// malformed fields included; such tokens are left to expiry. Only a payload
/// without a token or a failed write is reported.
#[route("/webhooks/judge0", method = "POST", method = "PUT")]
pub async fn judge0_webhook_handler(
    aggregator: web::Data<Aggregator>,
    body: web::Json<Value>,
) -> impl Responder {
    let body = body.into_inner();

    let Some(token) = body
        .get("token")
        .and_then(Value::as_str)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
    else {
        log::warn!("Webhook payload without a token");
        return invalid_argument("Missing token in webhook payload".to_string());
    };

    let decoded = serde_json::from_value::<SandboxReport>(body)
        .map_err(|e| e.to_string())
        .and_then(|report| report.decode().map_err(|e| e.to_string()));
    let decoded = match decoded {
        Ok(decoded) => decoded,
        Err(e) => {
            log::warn!("Malformed webhook payload for token {token}, leaving it to expiry: {e}");
            return acknowledged();
        }
    };

    match aggregator.deliver(&token, decoded).await {
        Ok(Delivery::Applied {
            submission_id,
            test_case,
        }) => {
            log::debug!(
                "Webhook for token {token} applied to submission {submission_id}, case {test_case}"
            );
            acknowledged()
        }
        Ok(Delivery::Held | Delivery::Ignored) => acknowledged(),
        Err(e) => {
            log::error!("Failed to record webhook result for token {token}: {e}");
            HttpResponse::InternalServerError().json(ErrorResponse::EXTERNAL)
        }
    }
}

fn acknowledged() -> HttpResponse {
    HttpResponse::Ok().json(json!({ "message": "Webhook received" }))
}
