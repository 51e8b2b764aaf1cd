use chrono::{TimeZone, Utc};
use pretty_assertions::assert_eq;

use super::*;

// =========================================================================
// Helpers
// =========================================================================

fn identify_result(contact_id: &str) -> IdentifyResult {
    IdentifyResult {
        contact: ResolvedContact {
            contact_id: contact_id.to_string(),
            is_anonymous: false,
            channel_associated_date: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        },
        token: "token".to_string(),
        token_expires_in_ms: 3_600_000,
    }
}

// =========================================================================
// Tests
// =========================================================================

#[test]
fn status_classification() {
    let ok: ApiResponse<()> = ApiResponse::new(204, None);
    assert!(ok.is_success());
    assert!(ok.is_operation_complete());

    let unprocessable: ApiResponse<()> = ApiResponse::new(422, None);
    assert!(unprocessable.is_client_error());
    assert!(unprocessable.is_operation_complete());

    let unavailable: ApiResponse<()> = ApiResponse::new(503, None);
    assert!(unavailable.is_server_error());
    assert!(!unavailable.is_operation_complete());

    let redirect: ApiResponse<()> = ApiResponse::new(302, None);
    assert!(!redirect.is_operation_complete());
}

#[tokio::test]
async fn mock_pops_script_then_falls_back() {
    let api = MockContactApi::new().with_default_identity(identify_result("fallback"));
    api.push_identity(MockReply::ok(identify_result("scripted")));
    api.push_identity(MockReply::TransportError);

    let first = api.resolve("channel", None, None).await.unwrap();
    assert_eq!(first.result.unwrap().contact.contact_id, "scripted");

    assert!(api.identify("channel", "user", None, None).await.is_err());

    let third = api.reset("channel", Some("orphan")).await.unwrap();
    assert_eq!(third.result.unwrap().contact.contact_id, "fallback");

    assert_eq!(
        api.calls()[2],
        ApiCall::Reset {
            channel_id: "channel".into(),
            possibly_orphaned_contact_id: Some("orphan".into()),
        }
    );
}

#[tokio::test]
async fn mock_without_identity_reports_transport_error() {
    let api = MockContactApi::new();
    assert!(api.resolve("channel", None, None).await.is_err());
    assert_eq!(api.calls().len(), 1);
}

#[tokio::test]
async fn mock_channel_calls_echo_request() {
    let api = MockContactApi::new();
    let response = api
        .associate_channel("contact", "chan-1", ChannelType::Sms)
        .await
        .unwrap();

    assert_eq!(
        response.result,
        Some(AssociatedChannel {
            channel_type: ChannelType::Sms,
            channel_id: "chan-1".into(),
        })
    );

    api.push_update(MockReply::status(422));
    let update = api.update("contact", None, None, None).await.unwrap();
    assert!(update.is_client_error());
}
