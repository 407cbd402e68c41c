use super::*;
use crate::eligibility::{EligibilityError, PartialIdentity};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::oneshot;
use tokio::time::timeout;

type Reply = Result<EligibilityResponse, EligibilityError>;

/// Answers every lookup with the same canned reply.
struct FixedService {
    reply: fn() -> Reply,
    calls: Mutex<Vec<EligibilityQuery>>,
}

impl FixedService {
    fn new(reply: fn() -> Reply) -> Self {
        Self { reply, calls: Mutex::new(Vec::new()) }
    }
}

#[async_trait]
impl EligibilityService for FixedService {
    async fn check_eligibility(&self, query: &EligibilityQuery) -> Reply {
        self.calls.lock().unwrap().push(query.clone());
        (self.reply)()
    }
}

/// Holds each lookup open until the test releases it, so responses can be
/// delivered out of order.
#[derive(Default)]
struct ControlledService {
    pending: Mutex<HashMap<String, oneshot::Receiver<Reply>>>,
    calls: Mutex<Vec<String>>,
}

impl ControlledService {
    fn expect(&self, cni: &str) -> oneshot::Sender<Reply> {
        let (tx, rx) = oneshot::channel();
        self.pending.lock().unwrap().insert(cni.to_string(), rx);
        tx
    }

    fn called(&self, cni: &str) -> bool {
        self.calls.lock().unwrap().iter().any(|c| c == cni)
    }
}

#[async_trait]
impl EligibilityService for ControlledService {
    async fn check_eligibility(&self, query: &EligibilityQuery) -> Reply {
        let rx = self.pending.lock().unwrap().remove(&query.cni);
        self.calls.lock().unwrap().push(query.cni.clone());
        match rx {
            Some(rx) => rx.await.unwrap_or_else(|_| Err(EligibilityError::Request("released without reply".into()))),
            None => Err(EligibilityError::Request("unexpected lookup".into())),
        }
    }
}

fn settings() -> GateSettings {
    GateSettings { max_requests_default: 10, min_lastname: 2, debounce: Duration::ZERO }
}

fn identity(last_name: &str) -> EligibilityResponse {
    EligibilityResponse {
        user: Some(PartialIdentity { last_name: Some(last_name.into()), ..PartialIdentity::default() }),
        request_available: Some(1),
    }
}

async fn wait_until(condition: impl Fn() -> bool) {
    timeout(Duration::from_millis(500), async {
        while !condition() {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("condition not reached");
}

// =============================================================================
// form selectors
// =============================================================================

#[test]
fn nothing_shown_without_type() {
    let form = RequestForm::default();
    assert!(!form.shows_routing_fields());
    assert!(!form.shows_request_object(2));
    assert!(!form.field_enabled(FormField::Cni));
    assert!(!form.field_enabled(FormField::Lastname));
    assert!(!form.cni_invalid());
}

#[test]
fn organisation_needs_lastname_longer_than_threshold() {
    let mut form = RequestForm::with_type(RequesterType::P1);
    assert!(form.shows_routing_fields());
    assert!(form.field_enabled(FormField::Mail));

    form.lastname = "Li".into();
    assert!(!form.shows_request_object(2));
    form.lastname = "Lee".into();
    assert!(form.shows_request_object(2));
    assert!(!form.shows_request_object(3));
}

#[test]
fn individual_needs_identifier() {
    let mut form = RequestForm::with_type(RequesterType::P3);
    assert!(form.cni_invalid());
    assert!(!form.shows_routing_fields());
    assert!(!form.shows_request_object(2));
    assert!(form.field_enabled(FormField::Cni));
    assert!(!form.field_enabled(FormField::Lastname));

    form.cni = "1".into();
    assert!(!form.cni_invalid());
    assert!(form.shows_routing_fields());
    assert!(form.shows_request_object(2));
    assert!(form.field_enabled(FormField::Lastname));
}

#[test]
fn set_parses_channels() {
    let mut form = RequestForm::with_type(RequesterType::A);
    assert_eq!(form.askby, DeliveryChannel::Counter);
    form.set(FormField::Askby, "3").unwrap();
    form.set(FormField::Responseby, "2").unwrap();
    assert_eq!(form.askby, DeliveryChannel::Email);
    assert_eq!(form.responseby, DeliveryChannel::Mail);

    assert!(matches!(form.set(FormField::Askby, "7"), Err(FormError::InvalidChannel(_))));
    assert!(matches!(form.set(FormField::Askby, "post"), Err(FormError::InvalidChannel(_))));
    assert_eq!(form.askby, DeliveryChannel::Email);
}

#[test]
fn form_serializes_with_wire_names() {
    let mut form = RequestForm::with_type(RequesterType::P2);
    form.responseby = DeliveryChannel::Mail;
    let value = serde_json::to_value(&form).unwrap();
    assert_eq!(value["type"], "P2");
    assert_eq!(value["askby"], 1);
    assert_eq!(value["responseby"], 2);
    assert_eq!(value["adress"], "");
}

// =============================================================================
// gate
// =============================================================================

#[tokio::test]
async fn individual_identifier_resolves_available_requests() {
    let service = Arc::new(FixedService::new(|| {
        Ok(EligibilityResponse {
            user: Some(PartialIdentity {
                first_name: Some("Anne".into()),
                last_name: Some("Martin".into()),
                ..PartialIdentity::default()
            }),
            request_available: Some(2),
        })
    }));
    let gate = EligibilityGate::new(settings(), service.clone());
    gate.set_type(RequesterType::P3);
    gate.set_field(FormField::Codepostal, "29200").unwrap();

    let outcome = gate.on_blur(FormField::Cni, " 12345 ").await.unwrap();
    assert_eq!(outcome, CheckOutcome::Resolved { available_requests: 2 });

    let snapshot = gate.snapshot();
    assert_eq!(snapshot.state, GateState::Resolved);
    assert_eq!(snapshot.available_requests, 2);
    assert_eq!(snapshot.form.cni, "12345");
    assert_eq!(snapshot.form.firstname, "Anne");
    assert_eq!(snapshot.form.lastname, "Martin");
    assert_eq!(snapshot.form.codepostal, "29200", "absent fields are not overwritten");
    assert!(snapshot.visibility.request_object);

    let calls = service.calls.lock().unwrap();
    assert_eq!(*calls, vec![EligibilityQuery { cni: "12345".into(), requester_type: RequesterType::P3 }]);
}

#[tokio::test]
async fn missing_allowance_falls_back_to_configured_maximum() {
    let gate = EligibilityGate::new(settings(), Arc::new(FixedService::new(|| Ok(EligibilityResponse::default()))));
    gate.set_type(RequesterType::P1);
    let outcome = gate.on_blur(FormField::Cni, "ABC").await.unwrap();
    assert_eq!(outcome, CheckOutcome::Resolved { available_requests: 10 });
}

#[tokio::test]
async fn service_contact_details_prefill_the_form() {
    let service = FixedService::new(|| {
        Ok(EligibilityResponse {
            user: Some(PartialIdentity {
                last_name: Some("Doe".into()),
                adress: Some("1 rue X".into()),
                commune: Some("Rennes".into()),
                mail: Some("j@d.fr".into()),
                ..PartialIdentity::default()
            }),
            request_available: Some(3),
        })
    });
    let gate = EligibilityGate::new(settings(), Arc::new(service));
    gate.set_type(RequesterType::P3);
    gate.set_field(FormField::Firstname, "Jane").unwrap();

    let outcome = gate.on_blur(FormField::Cni, "12345").await.unwrap();
    assert_eq!(outcome, CheckOutcome::Resolved { available_requests: 3 });

    let form = gate.snapshot().form;
    assert_eq!(form.adress, "1 rue X");
    assert_eq!(form.commune, "Rennes");
    assert_eq!(form.mail, "j@d.fr");
    assert_eq!(form.lastname, "Doe");
    assert_eq!(form.firstname, "Jane");
}

/// Unlike a truthiness fallback, an explicit 0 means "no requests left"
/// and does not fall back to the configured maximum.
#[tokio::test]
async fn zero_allowance_is_kept_not_replaced_by_maximum() {
    let service = FixedService::new(|| Ok(EligibilityResponse { user: None, request_available: Some(0) }));
    let gate = EligibilityGate::new(settings(), Arc::new(service));
    gate.set_type(RequesterType::P3);
    gate.on_blur(FormField::Cni, "12345").await.unwrap();
    assert_eq!(gate.available_requests(), 0);
}

#[tokio::test]
async fn short_identifier_or_missing_type_does_not_check() {
    let service = Arc::new(FixedService::new(|| Ok(EligibilityResponse::default())));
    let gate = EligibilityGate::new(settings(), service.clone());

    assert_eq!(gate.on_blur(FormField::Cni, "12345").await.unwrap(), CheckOutcome::NotTriggered);
    gate.set_type(RequesterType::P3);
    assert_eq!(gate.on_blur(FormField::Cni, "  12 ").await.unwrap(), CheckOutcome::NotTriggered);
    assert_eq!(gate.on_blur(FormField::Lastname, "Martin").await.unwrap(), CheckOutcome::NotTriggered);

    assert!(service.calls.lock().unwrap().is_empty());
    assert_eq!(gate.snapshot().state, GateState::Idle);
    assert_eq!(gate.snapshot().form.cni, "12");
}

#[tokio::test]
async fn failure_leaves_form_and_notifies() {
    let service = FixedService::new(|| Err(EligibilityError::Status { status: 500, body: String::new() }));
    let gate = EligibilityGate::new(settings(), Arc::new(service));
    gate.set_type(RequesterType::P3);
    gate.set_field(FormField::Lastname, "Martin").unwrap();

    let outcome = gate.on_blur(FormField::Cni, "12345").await.unwrap();
    assert_eq!(
        outcome,
        CheckOutcome::Failed(Notification {
            title: "Error".into(),
            message: "cadastrapp.requestForm.availableReqError".into(),
        })
    );
    let snapshot = gate.snapshot();
    assert_eq!(snapshot.state, GateState::Failed);
    assert_eq!(snapshot.form.lastname, "Martin");
    assert_eq!(snapshot.available_requests, 10);
}

#[tokio::test]
async fn stale_first_response_never_overwrites_second() {
    let service = Arc::new(ControlledService::default());
    let first_reply = service.expect("11111");
    let second_reply = service.expect("22222");
    let gate = EligibilityGate::new(settings(), service.clone());
    gate.set_type(RequesterType::P3);

    let first = tokio::spawn({
        let gate = gate.clone();
        async move { gate.on_blur(FormField::Cni, "11111").await.unwrap() }
    });
    wait_until(|| service.called("11111")).await;
    assert!(!gate.snapshot().visibility.request_object, "hidden while checking");

    let second = tokio::spawn({
        let gate = gate.clone();
        async move { gate.on_blur(FormField::Cni, "22222").await.unwrap() }
    });
    wait_until(|| service.called("22222")).await;

    second_reply.send(Ok(identity("Second"))).unwrap();
    assert_eq!(second.await.unwrap(), CheckOutcome::Resolved { available_requests: 1 });

    first_reply.send(Ok(identity("First"))).unwrap();
    assert_eq!(first.await.unwrap(), CheckOutcome::Superseded);

    let snapshot = gate.snapshot();
    assert_eq!(snapshot.form.cni, "22222");
    assert_eq!(snapshot.form.lastname, "Second");
    assert_eq!(snapshot.state, GateState::Resolved);
}

#[tokio::test]
async fn response_for_edited_identifier_is_dropped() {
    let service = Arc::new(ControlledService::default());
    let reply = service.expect("11111");
    let gate = EligibilityGate::new(settings(), service.clone());
    gate.set_type(RequesterType::P3);

    let check = tokio::spawn({
        let gate = gate.clone();
        async move { gate.on_blur(FormField::Cni, "11111").await.unwrap() }
    });
    wait_until(|| service.called("11111")).await;
    gate.set_field(FormField::Cni, "99").unwrap();

    reply.send(Ok(identity("Stale"))).unwrap();
    assert_eq!(check.await.unwrap(), CheckOutcome::Superseded);

    let snapshot = gate.snapshot();
    assert_eq!(snapshot.form.lastname, "");
    assert_eq!(snapshot.state, GateState::Idle);
}

#[tokio::test]
async fn check_superseded_during_debounce_never_reaches_service() {
    let service = Arc::new(FixedService::new(|| Ok(EligibilityResponse::default())));
    let gate = EligibilityGate::new(
        GateSettings { debounce: Duration::from_millis(50), ..settings() },
        service.clone(),
    );
    gate.set_type(RequesterType::P3);

    let first = tokio::spawn({
        let gate = gate.clone();
        async move { gate.on_blur(FormField::Cni, "11111").await.unwrap() }
    });
    wait_until(|| gate.snapshot().state == GateState::Checking).await;

    let second = gate.on_blur(FormField::Cni, "22222").await.unwrap();
    assert_eq!(second, CheckOutcome::Resolved { available_requests: 10 });
    assert_eq!(first.await.unwrap(), CheckOutcome::Superseded);

    let calls = service.calls.lock().unwrap();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].cni, "22222");
}

#[tokio::test]
async fn choosing_type_resets_form_and_abandons_check() {
    let service = Arc::new(ControlledService::default());
    let reply = service.expect("11111");
    let gate = EligibilityGate::new(settings(), service.clone());
    gate.set_type(RequesterType::P3);
    gate.set_field(FormField::Mail, "a@b.c").unwrap();

    let check = tokio::spawn({
        let gate = gate.clone();
        async move { gate.on_blur(FormField::Cni, "11111").await.unwrap() }
    });
    wait_until(|| service.called("11111")).await;
    gate.set_type(RequesterType::P1);

    reply.send(Ok(identity("Stale"))).unwrap();
    assert_eq!(check.await.unwrap(), CheckOutcome::Superseded);

    let snapshot = gate.snapshot();
    assert_eq!(snapshot.form, RequestForm::with_type(RequesterType::P1));
    assert_eq!(snapshot.state, GateState::Idle);
}

#[tokio::test]
async fn close_resets_form_and_allowance() {
    let service = FixedService::new(|| Ok(EligibilityResponse { user: None, request_available: Some(3) }));
    let gate = EligibilityGate::new(settings(), Arc::new(service));
    gate.set_type(RequesterType::P3);
    gate.on_blur(FormField::Cni, "12345").await.unwrap();
    assert_eq!(gate.available_requests(), 3);

    gate.close();
    let snapshot = gate.snapshot();
    assert_eq!(snapshot.form, RequestForm::default());
    assert_eq!(snapshot.available_requests, 10);
    assert_eq!(snapshot.state, GateState::Idle);
}

#[test]
fn snapshot_serializes_for_client() {
    let gate = EligibilityGate::new(settings(), Arc::new(FixedService::new(|| Ok(EligibilityResponse::default()))));
    gate.set_type(RequesterType::P3);
    let value = serde_json::to_value(gate.snapshot()).unwrap();
    assert_eq!(value["state"], "idle");
    assert_eq!(value["availableRequests"], 10);
    assert_eq!(value["visibility"]["cniInvalid"], true);
    assert_eq!(value["form"]["type"], "P3");
}

#[tokio::test]
async fn blur_moves_to_checking_before_lookup_runs() {
    let service = Arc::new(FixedService::new(|| Ok(EligibilityResponse::default())));
    let gate = EligibilityGate::new(settings(), service.clone());
    gate.set_type(RequesterType::A);

    let check = gate.blur(FormField::Cni, "ZX900 ").unwrap().expect("check due");
    assert_eq!(check.key(), &EligibilityQuery { cni: "ZX900".into(), requester_type: RequesterType::A });
    assert_eq!(gate.snapshot().state, GateState::Checking);
    assert!(service.calls.lock().unwrap().is_empty());

    assert_eq!(check.run().await, CheckOutcome::Resolved { available_requests: 10 });
    assert_eq!(service.calls.lock().unwrap().len(), 1);
}
