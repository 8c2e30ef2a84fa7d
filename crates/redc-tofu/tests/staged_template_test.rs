//! Template preparation and staged provisioning over the in-memory backend.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use redc_tofu::template::copy_template;
use redc_tofu::template::write_tfvars;
use redc_tofu::template::MANIFEST_FILE;
use redc_tofu::template::TFVARS_FILE;
use redc_tofu::testing::MockBackend;
use redc_tofu::testing::MOCK_OUTPUTS_FILE;
use redc_tofu::ProvisionBackend;
use redc_tofu::ProvisionUnit;
use redc_tofu::ProvisionerRegistry;
use redc_tofu::RetryPolicy;
use redc_tofu::TemplateManifest;
use tokio_util::sync::CancellationToken;

fn quick() -> RetryPolicy {
    RetryPolicy {
        attempts: 3,
        delay: Duration::from_millis(1),
    }
}

/// A `staged` template with a C2 stage and a redirector stage.
fn staged_template(root: &std::path::Path) -> std::path::PathBuf {
    let template = root.join("templates/c2/staged");
    std::fs::create_dir_all(template.join("c2-ecs")).unwrap();
    std::fs::create_dir_all(template.join("zone-node")).unwrap();
    std::fs::create_dir_all(template.join(".terraform")).unwrap();
    std::fs::write(template.join(MANIFEST_FILE), r#"{"family":"staged","stages":["c2-ecs","zone-node"]}"#).unwrap();
    std::fs::write(template.join("c2-ecs/main.tf"), "# c2").unwrap();
    std::fs::write(template.join("c2-ecs").join(MOCK_OUTPUTS_FILE), r#"{"public_ip":"10.1.0.5"}"#).unwrap();
    std::fs::write(template.join("zone-node/main.tf"), "# zone").unwrap();
    std::fs::write(template.join(".terraform/provider.bin"), "cache").unwrap();
    template
}

#[tokio::test]
async fn test_staged_case_lifecycle() {
    let root = tempfile::tempdir().unwrap();
    let template = staged_template(root.path());
    let case_dir = root.path().join("project/demo/case-1");

    copy_template(&template, &case_dir).await.unwrap();
    assert!(!case_dir.join(".terraform").exists());

    let manifest = TemplateManifest::load(&case_dir).await.unwrap();
    assert_eq!(manifest.family, "staged");

    let vars = BTreeMap::from([("domain".to_string(), "example.org".to_string())]);
    write_tfvars(&case_dir, &manifest.stages, &vars).await.unwrap();
    for dir in [case_dir.clone(), case_dir.join("c2-ecs"), case_dir.join("zone-node")] {
        assert!(dir.join(TFVARS_FILE).is_file(), "missing tfvars in {}", dir.display());
    }

    let backend = Arc::new(MockBackend::new());
    let registry = ProvisionerRegistry::with_defaults(backend.clone(), quick());
    let provisioner = registry.get(&manifest.family).unwrap();
    let unit = ProvisionUnit::new(&case_dir).with_stages(manifest.stages.clone());
    let cancel = CancellationToken::new();

    provisioner.apply(&unit, &cancel).await.unwrap();

    let outputs = provisioner.backend().output(&unit.output_dir(), &cancel).await.unwrap();
    assert_eq!(outputs["public_ip"], "\"10.1.0.5\"");

    provisioner.change(&unit, &cancel).await.unwrap();
    provisioner.destroy(&unit, &cancel).await.unwrap();

    let calls: Vec<String> = backend
        .calls()
        .into_iter()
        .map(|c| c.replace(&format!("{}/", case_dir.display()), ""))
        .collect();
    assert_eq!(
        calls,
        vec![
            "init c2-ecs",
            "apply c2-ecs",
            "init zone-node",
            "apply zone-node",
            "output c2-ecs",
            "destroy zone-node",
            "apply zone-node",
            "destroy zone-node",
            "destroy c2-ecs",
        ]
    );
}

#[tokio::test]
async fn test_failed_stage_stops_later_stages() {
    let root = tempfile::tempdir().unwrap();
    let template = staged_template(root.path());
    let backend = Arc::new(MockBackend::new());
    backend.fail_next("apply", 2);

    let registry = ProvisionerRegistry::with_defaults(backend.clone(), quick());
    let unit = ProvisionUnit::new(&template).with_stages(vec!["c2-ecs".into(), "zone-node".into()]);
    let err = registry.get("staged").unwrap().apply(&unit, &CancellationToken::new()).await.unwrap_err();

    assert!(!err.is_canceled());
    assert!(backend.calls().iter().all(|c| !c.contains("zone-node")));
}

#[tokio::test]
async fn test_explicit_outputs_win_over_fixture() {
    let root = tempfile::tempdir().unwrap();
    let template = staged_template(root.path());
    let dir = template.join("c2-ecs");
    let backend = MockBackend::new();
    backend.set_outputs(&dir, BTreeMap::from([("public_ip".to_string(), "\"192.0.2.1\"".to_string())]));

    let outputs = backend.output(&dir, &CancellationToken::new()).await.unwrap();
    assert_eq!(outputs["public_ip"], "\"192.0.2.1\"");
}
