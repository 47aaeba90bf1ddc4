//! Transactional email functions: sending, provider delivery events and inbound mail.

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::Json,
};
use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use crate::{
    AppState,
    db::models::{
        email_logs::{EmailLogCreateDBRequest, EmailLogUpdateDBRequest, EmailStatus},
        inbox_messages::InboxMessageCreateDBRequest,
    },
    email::{OutgoingEmail, validate_address},
    errors::{Error, Result},
    functions::models::{EmailEvent, EventAck, InboundEmail, InboundEmailResponse, SendEmailRequest, SendEmailResponse},
    types::abbrev_uuid,
    webhooks::verify_headers,
};

/// Message IDs are stored without the angle brackets of the `Message-ID` header, so that
/// providers reporting either form match the same row.
fn normalize_message_id(message_id: &str) -> &str {
    message_id.trim().trim_start_matches('<').trim_end_matches('>')
}

/// Send an email, either fully specified or rendered from a built-in template.
#[instrument(skip_all, err)]
pub async fn send_email(State(state): State<AppState>, Json(request): Json<SendEmailRequest>) -> Result<Json<SendEmailResponse>> {
    let to = request.to.into_vec();
    if to.is_empty() {
        return Err(Error::BadRequest {
            message: "'to' must contain at least one address".to_string(),
        });
    }
    for address in &to {
        validate_address(address)?;
    }

    let template_name = request.template.as_ref().map(|template| template.name().to_string());
    let rendered = request.template.as_ref().map(|template| template.render(state.config.site_url.as_str()));

    let subject = request
        .subject
        .filter(|subject| !subject.trim().is_empty())
        .or_else(|| rendered.as_ref().map(|r| r.subject.clone()))
        .ok_or_else(|| Error::BadRequest {
            message: "'subject' is required".to_string(),
        })?;

    let email = OutgoingEmail {
        subject: subject.clone(),
        html: request.html.or_else(|| rendered.as_ref().map(|r| r.html.clone())),
        text: request.text.or_else(|| rendered.as_ref().map(|r| r.text.clone())),
        reply_to: request.reply_to,
        to,
    };
    if email.html.is_none() && email.text.is_none() {
        return Err(Error::BadRequest {
            message: "one of 'html', 'text' or 'template' is required".to_string(),
        });
    }

    let recipient = email.to.join(", ");

    match state.email.send(&email).await {
        Ok(sent) => {
            let log = state
                .store
                .record_email(&EmailLogCreateDBRequest {
                    provider_message_id: Some(normalize_message_id(&sent.message_id).to_string()),
                    recipient,
                    subject,
                    template: template_name,
                    status: EmailStatus::Sent,
                    error: None,
                })
                .await?;

            info!(email_id = %abbrev_uuid(&log.id), "Email sent");
            Ok(Json(SendEmailResponse {
                id: log.id,
                status: log.status,
            }))
        }
        Err(e @ Error::BadRequest { .. }) => Err(e),
        Err(e) => {
            let log = state
                .store
                .record_email(&EmailLogCreateDBRequest {
                    provider_message_id: None,
                    recipient,
                    subject,
                    template: template_name,
                    status: EmailStatus::Failed,
                    error: Some(e.to_string()),
                })
                .await?;

            warn!(email_id = %abbrev_uuid(&log.id), error = %e, "Email delivery failed");
            Err(e)
        }
    }
}

/// Delivery webhook from the email provider.
///
/// The raw body is taken so the signature can be checked before parsing. Events for unknown
/// messages and event types we don't track are acknowledged, otherwise the provider keeps retrying.
#[instrument(skip_all, err)]
pub async fn email_events(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Result<Json<EventAck>> {
    if let Some(secret) = &state.config.email.webhook_secret {
        verify_headers(&headers, &body, secret, state.config.email.webhook_tolerance, Utc::now().timestamp()).map_err(|e| {
            Error::Unauthenticated {
                message: Some(format!("Invalid webhook signature: {e}")),
            }
        })?;
    }

    let event: EmailEvent = serde_json::from_slice(&body).map_err(|e| Error::BadRequest {
        message: format!("Invalid event payload: {e}"),
    })?;

    let Some(status) = event.status() else {
        debug!(event_type = %event.event_type, "Ignoring untracked email event");
        return Ok(Json(EventAck {
            received: true,
            updated: false,
        }));
    };

    let update = EmailLogUpdateDBRequest {
        status,
        error: event.error(),
    };
    let updated = state
        .store
        .update_email_status(normalize_message_id(&event.data.email_id), &update)
        .await?;

    match &updated {
        Some(log) => debug!(email_id = %abbrev_uuid(&log.id), %status, "Email status updated"),
        None => warn!(provider_message_id = %event.data.email_id, event_type = %event.event_type, "Event for unknown email"),
    }

    Ok(Json(EventAck {
        received: true,
        updated: updated.is_some(),
    }))
}

/// Store a message forwarded by the inbound mail webhook.
#[instrument(skip_all, err)]
pub async fn inbound_email(
    State(state): State<AppState>,
    Json(message): Json<InboundEmail>,
) -> Result<(StatusCode, Json<InboundEmailResponse>)> {
    if message.from.trim().is_empty() || message.to.trim().is_empty() {
        return Err(Error::BadRequest {
            message: "'from' and 'to' are required".to_string(),
        });
    }

    let stored = state
        .store
        .store_inbound(&InboxMessageCreateDBRequest {
            from_address: message.from,
            to_address: message.to,
            subject: message.subject,
            text_body: message.text,
            html_body: message.html,
        })
        .await?;

    info!(message_id = %abbrev_uuid(&stored.id), "Inbound email stored");
    Ok((StatusCode::CREATED, Json(InboundEmailResponse { id: stored.id })))
}
