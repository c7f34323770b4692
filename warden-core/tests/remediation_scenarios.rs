// warden-core/tests/remediation_scenarios.rs
//! End-to-end invocations against the in-memory cloud.

use anyhow::Result;
use serde_json::{json, Value};
use std::sync::Arc;

use warden_core::config::TrailTamperConfig;
use warden_core::labels;
use warden_core::notify::Delivery;
use warden_core::outcome::CompletedOutcome;
use warden_core::providers::{
    BlockDevice, CallerIdentity, Instance, IpPermission, NetworkInterface, SecurityGroup,
};
use warden_core::{
    bootstrap, handle_event, Collaborators, HandlerKind, InvocationOutcome, MemoryCloud,
    RemediationContext, SkipReason, WardenConfig,
};

const ACCOUNT: &str = "111122223333";
const OWN_SESSION: &str = "arn:aws:sts::111122223333:assumed-role/WardenRemediator/invocation";
const TRAIL: &str = "org-trail";

fn config() -> WardenConfig {
    let mut config = WardenConfig::default();
    config.channels.high = "ops-high".to_string();
    config.channels.medium = Some("ops-medium".to_string());
    config.tuning.create_backoff_ms = vec![0, 0, 0];
    config.tuning.poll_interval_ms = 0;
    config.trail_tamper = Some(TrailTamperConfig {
        trail_name: TRAIL.to_string(),
        log_bucket: "audit-logs".to_string(),
        ..Default::default()
    });
    config
}

async fn world() -> Arc<MemoryCloud> {
    let cloud = Arc::new(MemoryCloud::new());
    cloud
        .set_caller(CallerIdentity {
            account: ACCOUNT.to_string(),
            arn: OWN_SESSION.to_string(),
        })
        .await;
    cloud
}

async fn context(cloud: &Arc<MemoryCloud>, config: WardenConfig) -> RemediationContext {
    let ctx = bootstrap(config, Collaborators::from_memory(cloud.clone()))
        .await
        .unwrap();
    cloud.reset_journal().await;
    ctx
}

fn user_identity() -> Value {
    json!({
        "type": "IAMUser",
        "accountId": ACCOUNT,
        "arn": "arn:aws:iam::111122223333:user/dev",
        "userName": "dev",
        "principalId": "AIDAEXAMPLE"
    })
}

fn api_call(event_name: &str, identity: Value, params: Value) -> Value {
    json!({
        "detail-type": "AWS API Call via CloudTrail",
        "region": "us-east-1",
        "detail": {
            "eventName": event_name,
            "eventTime": "2024-05-01T12:00:00Z",
            "awsRegion": "us-east-1",
            "sourceIPAddress": "198.51.100.7",
            "userIdentity": identity,
            "requestParameters": params
        }
    })
}

fn finding(instance_id: &str, sample: bool) -> Value {
    json!({
        "detail-type": "GuardDuty Finding",
        "region": "us-east-1",
        "detail": {
            "id": "f-0001",
            "type": "CryptoCurrency:EC2/BitcoinTool.B!DNS",
            "resource": {"instanceDetails": {"instanceId": instance_id}},
            "service": {"additionalInfo": {"sample": sample}}
        }
    })
}

fn world_open(port: u16) -> IpPermission {
    IpPermission {
        protocol: "tcp".to_string(),
        from_port: Some(port),
        to_port: Some(port),
        ipv4_ranges: vec!["0.0.0.0/0".to_string()],
        ipv6_ranges: Vec::new(),
    }
}

fn compromised_host() -> Instance {
    Instance {
        instance_id: "i-0abc".to_string(),
        vpc_id: "vpc-1".to_string(),
        availability_zone: "us-east-1a".to_string(),
        root_device_name: Some("/dev/xvda".to_string()),
        network_interfaces: vec![NetworkInterface {
            interface_id: "eni-1".to_string(),
            groups: vec!["sg-app".to_string(), "sg-base".to_string()],
        }],
        block_devices: vec![
            BlockDevice {
                device_name: "/dev/xvda".to_string(),
                volume_id: Some("vol-root".to_string()),
            },
            BlockDevice {
                device_name: "/dev/sdb".to_string(),
                volume_id: Some("vol-data".to_string()),
            },
        ],
        ..Default::default()
    }
}

fn completed(outcome: &InvocationOutcome) -> &CompletedOutcome {
    outcome.completed().expect("invocation should have run")
}

#[test_log::test(tokio::test)]
async fn world_open_ssh_rule_is_revoked_and_reported() -> Result<()> {
    let cloud = world().await;
    cloud
        .insert_security_group(SecurityGroup {
            group_id: "sg-web".to_string(),
            group_name: "web".to_string(),
            vpc_id: "vpc-1".to_string(),
            ingress: vec![world_open(22), world_open(443)],
            egress: Vec::new(),
        })
        .await;
    let ctx = context(&cloud, config()).await;

    let raw = api_call("AuthorizeSecurityGroupIngress", user_identity(), json!({"groupId": "sg-web"}));
    let outcome = handle_event(&ctx, raw, None).await?;
    let done = completed(&outcome);

    assert!(done.ok);
    let removed = done.removed.as_ref().unwrap();
    assert_eq!(removed["sg-web"], vec!["IPv4 0.0.0.0/0 tcp/22"]);
    assert_eq!(done.actions, vec!["RevokeIngress:sg-web"]);

    let group = cloud.security_group("sg-web").await.unwrap();
    assert_eq!(group.ingress, vec![world_open(443)]);
    let group_labels = cloud.labels_of("sg-web").await;
    assert_eq!(group_labels[labels::REASON], "SSHWorldOpen");
    assert_eq!(group_labels[labels::STATUS], "Remediated");

    let outbox = cloud.outbox().await;
    assert_eq!(outbox.len(), 1);
    assert_eq!(outbox[0].channel, "ops-medium");
    assert!(outbox[0].body.contains("- sg-web: IPv4 0.0.0.0/0 tcp/22"));
    assert_eq!(outbox[0].attributes["severity"], "MEDIUM");
    assert_eq!(outbox[0].attributes["removed"], "true");
    assert_eq!(cloud.mutations().await, vec!["RevokeSecurityGroupIngress", "AddTags"]);
    Ok(())
}

#[test_log::test(tokio::test)]
async fn repeated_ingress_event_changes_nothing_and_stays_quiet() -> Result<()> {
    let cloud = world().await;
    cloud
        .insert_security_group(SecurityGroup {
            group_id: "sg-web".to_string(),
            ingress: vec![world_open(3389)],
            ..Default::default()
        })
        .await;
    let ctx = context(&cloud, config()).await;
    let raw = api_call("AuthorizeSecurityGroupIngress", user_identity(), json!({"groupId": "sg-web"}));

    handle_event(&ctx, raw.clone(), None).await?;
    assert_eq!(cloud.labels_of("sg-web").await[labels::REASON], "RDPWorldOpen");
    cloud.reset_journal().await;

    let again = handle_event(&ctx, raw, None).await?;
    let done = completed(&again);
    assert!(done.ok);
    assert!(done.removed.as_ref().unwrap().is_empty());
    assert_eq!(done.notification, None);
    assert!(cloud.mutations().await.is_empty());
    assert_eq!(cloud.outbox().await.len(), 1);
    Ok(())
}

#[test_log::test(tokio::test)]
async fn missing_instance_yields_alert_only() -> Result<()> {
    let cloud = world().await;
    let ctx = context(&cloud, config()).await;

    let outcome = handle_event(&ctx, finding("i-gone", true), None).await?;
    let done = completed(&outcome);

    assert!(!done.ok);
    assert_eq!(done.error.as_deref(), Some("describe-failed"));
    assert_eq!(done.alert_only, Some(true));
    assert_eq!(done.sample, Some(true));
    assert!(cloud.mutations().await.is_empty());

    let outbox = cloud.outbox().await;
    assert_eq!(outbox.len(), 1);
    assert_eq!(outbox[0].channel, "ops-high");
    assert!(outbox[0].subject.contains("alert-only"));
    assert_eq!(outbox[0].attributes["alertOnly"], "true");
    assert_eq!(outbox[0].attributes["sample"], "true");

    let json = serde_json::to_value(&outcome)?;
    assert_eq!(json["ok"], json!(false));
    assert_eq!(json["alertOnly"], json!(true));
    Ok(())
}

#[test_log::test(tokio::test)]
async fn remediated_trail_still_reconverges() -> Result<()> {
    let cloud = world().await;
    let arn = cloud.insert_trail(TRAIL, false).await;
    cloud
        .seed_labels(&arn, [(labels::STATUS.to_string(), "Remediated".to_string())].into())
        .await;
    let ctx = context(&cloud, config()).await;

    let raw = api_call("StopLogging", user_identity(), json!({"name": arn}));
    let outcome = handle_event(&ctx, raw, None).await?;
    let done = completed(&outcome);

    assert!(done.ok, "errors: {:?}", done.errors);
    assert_eq!(done.actions, vec!["UpdateTrail", "StartLoggingEnsured"]);
    let calls = cloud.calls().await;
    assert!(calls.contains(&"UpdateTrail".to_string()));
    assert!(calls.contains(&"StartLogging".to_string()));

    let trail = cloud.trail(TRAIL).await.unwrap();
    assert!(trail.logging);
    assert_eq!(trail.settings.unwrap().bucket, "audit-logs");
    let trail_labels = cloud.labels_of(&arn).await;
    assert_eq!(trail_labels[labels::STATUS], "Remediated");
    assert_eq!(trail_labels[labels::REASON], "Tamper:StopLogging");

    let outbox = cloud.outbox().await;
    assert_eq!(outbox.len(), 1);
    assert!(outbox[0].subject.starts_with("[Warden/HIGH] StopLogging"));
    assert!(outbox[0].body.contains("- StartLoggingEnsured"));
    Ok(())
}

#[test_log::test(tokio::test)]
async fn deleted_trail_is_recreated() -> Result<()> {
    let cloud = world().await;
    let ctx = context(&cloud, config()).await;

    let raw = api_call("DeleteTrail", user_identity(), json!({"name": TRAIL}));
    let outcome = handle_event(&ctx, raw, None).await?;
    let done = completed(&outcome);

    assert!(done.ok, "errors: {:?}", done.errors);
    assert_eq!(done.actions, vec!["CreateTrail", "StartLoggingEnsured"]);
    assert!(cloud.trail(TRAIL).await.unwrap().logging);
    Ok(())
}

#[test_log::test(tokio::test)]
async fn exhausted_create_backoff_is_reported_not_raised() -> Result<()> {
    let cloud = world().await;
    cloud.fail("CreateTrail", "InsufficientS3BucketPolicyException").await;
    let ctx = context(&cloud, config()).await;

    let raw = api_call("StopLogging", user_identity(), json!({"name": TRAIL}));
    let outcome = handle_event(&ctx, raw, None).await?;
    let done = completed(&outcome);

    assert!(!done.ok);
    assert_eq!(done.errors[0], "CreateOrUpdate:InsufficientS3BucketPolicyException");
    assert!(done.errors.contains(&"StartLogging:NotConverged".to_string()));
    let creates = cloud.calls().await.iter().filter(|c| *c == "CreateTrail").count();
    assert_eq!(creates, 3);
    assert_eq!(cloud.outbox().await.len(), 1);
    Ok(())
}

#[test_log::test(tokio::test)]
async fn own_and_foreign_events_are_skipped_silently() -> Result<()> {
    let cloud = world().await;
    cloud.insert_trail(TRAIL, false).await;
    let ctx = context(&cloud, config()).await;

    let own = json!({"type": "AssumedRole", "accountId": ACCOUNT, "arn": OWN_SESSION});
    let cases = [
        (api_call("StopLogging", own, json!({"name": TRAIL})), SkipReason::SelfActor),
        (api_call("CreateBucket", user_identity(), json!({})), SkipReason::NotAllowedEvent),
        (
            api_call("StopLogging", user_identity(), json!({"name": "someone-elses-trail"})),
            SkipReason::OtherTarget,
        ),
    ];
    for (raw, reason) in cases {
        let outcome = handle_event(&ctx, raw, None).await?;
        assert_eq!(outcome.skip_reason(), Some(reason));
        assert!(outcome.ok());
    }
    assert!(cloud.mutations().await.is_empty());
    assert!(cloud.outbox().await.is_empty());
    Ok(())
}

#[test_log::test(tokio::test)]
async fn ingress_event_without_group_is_skipped() -> Result<()> {
    let cloud = world().await;
    let ctx = context(&cloud, config()).await;
    let raw = api_call("ModifySecurityGroupRules", user_identity(), json!({}));
    let outcome = handle_event(&ctx, raw, Some(HandlerKind::AdminPorts)).await?;
    assert_eq!(outcome.skip_reason(), Some(SkipReason::NoTargetId));
    Ok(())
}

#[test_log::test(tokio::test)]
async fn quarantine_contains_host_once() -> Result<()> {
    let cloud = world().await;
    cloud.insert_instance(compromised_host()).await;
    cloud.associate_profile("i-0abc", "iip-assoc-1").await;
    let ctx = context(&cloud, config()).await;

    let outcome = handle_event(&ctx, finding("i-0abc", false), None).await?;
    let done = completed(&outcome);
    assert!(done.ok, "errors: {:?}", done.errors);
    assert_eq!(done.actions.len(), 4);
    assert!(done.actions[0].starts_with("IsolationSG:sg-"));
    assert_eq!(&done.actions[1..], ["Snapshots:2", "DetachInstanceProfile", "StopInstance"]);

    let isolation = done.actions[0].trim_start_matches("IsolationSG:").to_string();
    let host = cloud.instance("i-0abc").await.unwrap();
    assert_eq!(host.state, "stopped");
    assert_eq!(host.network_interfaces[0].groups, vec![isolation.clone()]);
    assert!(cloud.security_group(&isolation).await.unwrap().egress.is_empty());

    let host_labels = cloud.labels_of("i-0abc").await;
    assert_eq!(host_labels[labels::STATUS], "Quarantined");
    assert_eq!(host_labels[labels::REASON], "CryptoMiningSuspected");
    assert_eq!(host_labels[labels::PREVIOUS_GROUPS], "sg-app,sg-base");
    assert_eq!(host_labels[labels::SNAPSHOT_COUNT], "2");
    assert_eq!(host_labels[labels::STOPPED], "true");

    let snapshots = cloud.snapshots().await;
    assert_eq!(snapshots.len(), 2);
    let root_snapshot = snapshots
        .iter()
        .find(|(_, s)| s.volume_id == "vol-root")
        .map(|(id, _)| id.clone())
        .unwrap();
    let forensic = cloud.labels_of(&root_snapshot).await;
    assert_eq!(forensic[labels::ROOT_DEVICE], "true");
    assert_eq!(forensic[labels::INCIDENT_ID], "f-0001");

    let outbox = cloud.outbox().await;
    assert_eq!(outbox.len(), 1);
    assert!(outbox[0].body.contains("Containment:"));
    assert_eq!(outbox[0].attributes["stopped"], "true");

    cloud.reset_journal().await;
    let again = handle_event(&ctx, finding("i-0abc", false), None).await?;
    assert_eq!(again.skip_reason(), Some(SkipReason::AlreadyRemediated));
    assert!(cloud.mutations().await.is_empty());
    assert_eq!(cloud.outbox().await.len(), 1);
    Ok(())
}

#[test_log::test(tokio::test)]
async fn failed_isolation_does_not_stop_the_other_steps() -> Result<()> {
    let cloud = world().await;
    cloud.insert_instance(compromised_host()).await;
    cloud.fail("ModifyNetworkInterfaceAttribute", "UnauthorizedOperation").await;
    let ctx = context(&cloud, config()).await;

    let outcome = handle_event(&ctx, finding("i-0abc", false), None).await?;
    let done = completed(&outcome);

    assert!(!done.ok);
    assert_eq!(done.errors, vec!["isolation:UnauthorizedOperation"]);
    assert_eq!(done.actions.last().map(String::as_str), Some("StopInstance"));
    assert_eq!(cloud.instance("i-0abc").await.unwrap().state, "stopped");

    let outbox = cloud.outbox().await;
    assert!(outbox[0].body.contains("- isolation:UnauthorizedOperation"));
    Ok(())
}

#[test_log::test(tokio::test)]
async fn profile_detached_concurrently_is_not_an_error() -> Result<()> {
    let cloud = world().await;
    cloud.insert_instance(compromised_host()).await;
    cloud.associate_profile("i-0abc", "iip-assoc-1").await;
    cloud.associate_profile("i-0abc", "iip-assoc-2").await;
    // Another invocation got to the first association after it was listed.
    cloud
        .fail_on("DisassociateIamInstanceProfile", "iip-assoc-1", "InvalidAssociationID.NotFound")
        .await;
    let ctx = context(&cloud, config()).await;

    let outcome = handle_event(&ctx, finding("i-0abc", false), None).await?;
    let done = completed(&outcome);
    assert!(done.ok, "errors: {:?}", done.errors);
    assert_eq!(&done.actions[1..], ["Snapshots:2", "DetachInstanceProfile", "StopInstance"]);

    cloud.clear_faults().await;
    cloud
        .insert_instance(Instance {
            instance_id: "i-0def".to_string(),
            ..compromised_host()
        })
        .await;
    cloud.associate_profile("i-0def", "iip-assoc-3").await;
    cloud.fail("DisassociateIamInstanceProfile", "InvalidAssociationID.NotFound").await;

    let outcome = handle_event(&ctx, finding("i-0def", false), None).await?;
    let done = completed(&outcome);
    assert!(done.ok, "errors: {:?}", done.errors);
    assert!(!done.actions.iter().any(|a| a == "DetachInstanceProfile"));
    assert_eq!(done.actions.last().map(String::as_str), Some("StopInstance"));
    Ok(())
}

#[test_log::test(tokio::test)]
async fn undeliverable_report_does_not_fail_the_invocation() -> Result<()> {
    let cloud = world().await;
    cloud.insert_trail(TRAIL, true).await;
    cloud.fail("Publish", "Throttling").await;
    let ctx = context(&cloud, config()).await;

    let raw = api_call("UpdateTrail", user_identity(), json!({"name": TRAIL}));
    let outcome = handle_event(&ctx, raw, None).await?;
    let done = completed(&outcome);
    assert!(done.ok);
    assert_eq!(done.notification, Some(Delivery::Failed("Throttling".to_string())));
    Ok(())
}

#[test_log::test(tokio::test)]
async fn event_dump_link_lands_in_the_report() -> Result<()> {
    let cloud = world().await;
    cloud.insert_trail(TRAIL, false).await;
    let mut config = config();
    config.event_dump.bucket = Some("dumps".to_string());
    let ctx = context(&cloud, config).await;

    let raw = api_call("StopLogging", user_identity(), json!({"name": TRAIL}));
    handle_event(&ctx, raw, None).await?;

    let body = &cloud.outbox().await[0].body;
    assert!(body.contains("Full event (pre-signed): memory://warden-memory/warden/events/us-east-1/StopLogging/"));
    assert!(body.contains("(expires in 3600s)"));
    assert!(cloud.calls().await.contains(&"PutObject".to_string()));
    Ok(())
}
