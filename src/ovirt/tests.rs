//! Unit tests for the oVirt adapter's URL handling, status mapping and
//! payload decoding.

use super::*;
use crate::registry::{SnapshotStatus, VmState};
use rstest::rstest;

#[rstest]
#[case("https://engine.example/ovirt-engine/api")]
#[case("https://engine.example/ovirt-engine/api/")]
#[case("  https://engine.example/ovirt-engine/api  ")]
fn split_engine_url_derives_sso_root(#[case] server: &str) {
    let (api, engine) = split_engine_url(server).expect("url should split");
    assert_eq!(api, "https://engine.example/ovirt-engine/api");
    assert_eq!(engine, "https://engine.example/ovirt-engine");
}

#[rstest]
#[case("engine.example/ovirt-engine/api")]
#[case("https://engine.example/ovirt-engine")]
fn split_engine_url_rejects_unusable_urls(#[case] server: &str) {
    let err = split_engine_url(server).expect_err("url should be rejected");
    assert!(matches!(err, OvirtError::InvalidUrl { .. }), "got {err:?}");
}

#[rstest]
fn vm_list_decodes_and_maps_states() {
    let body = r#"{"vm":[
        {"id":"1","name":"web","status":"up"},
        {"id":"2","name":"db","status":"down"},
        {"id":"3","name":"new"}
    ]}"#;
    let list: VmList = decode(body, "vms").expect("vm list should decode");
    let vms: Vec<Vm> = list.vm.into_iter().map(Vm::from).collect();

    assert_eq!(vms.len(), 3);
    assert_eq!(vms[0].state, VmState::Up);
    assert_eq!(vms[1].state, VmState::Other(String::from("down")));
    assert_eq!(vms[2].state, VmState::Other(String::from("unknown")));
}

#[rstest]
fn empty_collections_decode_from_bare_objects() {
    let list: VmList = decode("{}", "vms").expect("empty object should decode");
    assert!(list.vm.is_empty());

    let blank: DiskAttachmentList = decode("", "disk attachments").expect("blank body");
    assert!(blank.image_ids().is_empty());
}

#[rstest]
fn snapshot_without_status_is_treated_as_locked() {
    let body = r#"{"id":"snap-1","description":"GLUSTER-Geo-rep-snapshot"}"#;
    let wire: WireSnapshot = decode(body, "snapshot").expect("snapshot should decode");
    let snapshot = Snapshot::from(wire);

    assert_eq!(snapshot.id, SnapshotId(String::from("snap-1")));
    assert_eq!(snapshot.status, SnapshotStatus::Locked);
    assert_eq!(snapshot.description, "GLUSTER-Geo-rep-snapshot");
}

#[rstest]
fn disk_attachments_yield_image_ids() {
    let body = r#"{"disk_attachment":[
        {"id":"a1","disk":{"id":"d1","image_id":"img-1"}},
        {"id":"a2","disk":{"id":"d2"}},
        {"id":"a3"},
        {"id":"a4","disk":{"id":"d4","image_id":"img-4"}}
    ]}"#;
    let list: DiskAttachmentList = decode(body, "disk attachments").expect("should decode");

    assert_eq!(
        list.image_ids(),
        vec![
            DiskImageId(String::from("img-1")),
            DiskImageId(String::from("img-4"))
        ]
    );
}

#[rstest]
fn search_results_require_exact_name_match() {
    let candidates = vec![
        WireVm {
            id: String::from("1"),
            name: String::from("web-old"),
            status: Some(String::from("up")),
        },
        WireVm {
            id: String::from("2"),
            name: String::from("web"),
            status: Some(String::from("up")),
        },
    ];

    let picked = pick_vm_by_name(candidates, "web").expect("exact match should be found");
    assert_eq!(picked.id, "2");
}

#[rstest]
fn malformed_body_is_a_parse_error() {
    let err = decode::<VmList>("not-json", "vms").expect_err("should fail");
    assert!(
        matches!(err, OvirtError::Parse { ref resource, .. } if resource == "vms"),
        "got {err:?}"
    );
}

#[rstest]
fn blank_image_ids_are_dropped() {
    let body = r#"{"disk_attachment":[
        {"id":"a1","disk":{"id":"d1","image_id":""}},
        {"id":"a2","disk":{"id":"d2","image_id":"  "}},
        {"id":"a3","disk":{"id":"d3","image_id":"img-3"}}
    ]}"#;
    let list: DiskAttachmentList = decode(body, "disk attachments").expect("should decode");

    assert_eq!(list.image_ids(), vec![DiskImageId(String::from("img-3"))]);
}

#[rstest]
#[case(StatusCode::OK, Some("body"))]
#[case(StatusCode::ACCEPTED, Some("body"))]
#[case(StatusCode::NOT_FOUND, None)]
fn optional_body_treats_not_found_as_absent(
    #[case] status: StatusCode,
    #[case] expected: Option<&str>,
) {
    let found = optional_body(status, String::from("body"), "snapshot").expect("should map");
    assert_eq!(found.as_deref(), expected);
}

#[rstest]
#[case(StatusCode::CONFLICT)]
#[case(StatusCode::INTERNAL_SERVER_ERROR)]
#[case(StatusCode::UNAUTHORIZED)]
fn optional_body_reports_other_failures(#[case] status: StatusCode) {
    let err = optional_body(status, String::from("  engine busy \n"), "snapshot delete")
        .expect_err("status should be rejected");

    assert_eq!(
        err,
        OvirtError::Api {
            resource: String::from("snapshot delete"),
            status: status.as_u16(),
            message: String::from("engine busy"),
        }
    );
}

#[rstest]
fn status_body_rejects_not_found_for_required_resources() {
    let err = status_body(StatusCode::NOT_FOUND, String::new(), "vms")
        .expect_err("404 is an error when the resource must exist");
    assert!(matches!(err, OvirtError::Api { status: 404, .. }), "got {err:?}");
}

#[rstest]
fn issued_token_returns_access_token() {
    let response = TokenResponse {
        access_token: Some(String::from("tok")),
        error: None,
        error_description: None,
    };
    assert_eq!(issued_token(response, "admin@internal").expect("token"), "tok");
}

#[rstest]
#[case(Some("access_denied"), Some("Cannot authenticate user"), "Cannot authenticate user")]
#[case(Some("access_denied"), None, "access_denied")]
#[case(None, None, "no access token issued")]
fn issued_token_reports_refusal(
    #[case] error: Option<&str>,
    #[case] description: Option<&str>,
    #[case] expected: &str,
) {
    let response = TokenResponse {
        access_token: None,
        error: error.map(String::from),
        error_description: description.map(String::from),
    };

    let err = issued_token(response, "admin@internal").expect_err("refusal expected");

    assert_eq!(
        err,
        OvirtError::Authentication {
            user: String::from("admin@internal"),
            message: expected.to_owned(),
        }
    );
}
