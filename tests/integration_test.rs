// Integration tests for the homeyctl binary

use assert_cmd::cargo::cargo_bin_cmd;
use httpmock::prelude::*;
use predicates::prelude::*;
use serde_json::json;
use tempfile::TempDir;

const OLD: &str = "758520db-b1af-49b9-84b1-234e03ba5300";
const NEW: &str = "c827aef8-c786-45b6-b0e8-c41a786a6ae0";

/// Command isolated from any config on the machine running the tests.
fn homeyctl(home: &TempDir) -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("homeyctl");
    cmd.current_dir(home.path())
        .env("HOMEYCTL_CONFIG_DIR", home.path().join("config"))
        .env("RUST_LOG", "off");
    cmd
}

#[test]
fn test_write_commands_default_to_dry_run() {
    let home = TempDir::new().unwrap();
    for name in ["no-nbsp", "replace-device"] {
        homeyctl(&home)
            .args([name, "--help"])
            .assert()
            .success()
            .stdout(predicates::str::contains("--apply"));
    }
}

#[test]
fn test_missing_config_is_reported() {
    let home = TempDir::new().unwrap();
    homeyctl(&home)
        .arg("flows")
        .assert()
        .failure()
        .stderr(predicates::str::contains("Hub address is required"));
}

#[test]
fn test_configure_then_show_masks_token() {
    let home = TempDir::new().unwrap();
    homeyctl(&home)
        .args([
            "configure",
            "--address",
            "http://192.168.1.20",
            "--token",
            "very-secret",
            "--scope",
            "local",
        ])
        .assert()
        .success();

    homeyctl(&home)
        .arg("config-show")
        .assert()
        .success()
        .stdout(predicates::str::contains("http://192.168.1.20"))
        .stdout(predicates::str::contains("*****"))
        .stdout(predicates::str::contains("very-secret").not());
}

#[test]
fn test_devices_prints_zone_tree() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/api/manager/devices/device/");
        then.status(200).json_body(json!({
            "d1": {
                "id": "d1", "name": "Desk lamp", "driverId": "homey:app:com.ikea:bulb",
                "zone": "z2", "available": true, "ready": true, "flags": [], "settings": {}
            }
        }));
    });
    server.mock(|when, then| {
        when.method(GET).path("/api/manager/zones/zone/");
        then.status(200).json_body(json!({
            "z1": {"id": "z1", "name": "Home", "parent": null},
            "z2": {"id": "z2", "name": "Office", "parent": "z1"}
        }));
    });

    let home = TempDir::new().unwrap();
    homeyctl(&home)
        .args(["--address", server.base_url().as_str(), "--token", "t", "devices"])
        .assert()
        .success()
        .stdout(predicates::str::starts_with(
            "Home:\n  Office:\n    Desk lamp:\n      Id: d1\n",
        ));
}

#[test]
fn test_broken_flows_reports_missing_token() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/api/manager/flow/flow/");
        then.status(200).json_body(json!({
            "f1": {
                "id": "f1", "name": "Healthy",
                "trigger": {"id": "homey:manager:cron:time", "args": {"time": "07:00"}},
                "conditions": [],
                "actions": [{"id": "homey:manager:notifications:create_notification",
                             "args": {"text": "Now [[time]]"}}]
            },
            "f2": {
                "id": "f2", "name": "Stale",
                "trigger": {"id": "homey:manager:cron:time", "args": {}},
                "conditions": [],
                "actions": [{"id": "homey:manager:notifications:create_notification",
                             "args": {"text": "[[homey:device:gone|measure_power]]"}}]
            }
        }));
    });
    server.mock(|when, then| {
        when.method(GET).path("/api/manager/flowtoken/flowtoken/");
        then.status(200).json_body(json!({
            "homey:device:abc:measure_power": {"id": "measure_power"}
        }));
    });
    server.mock(|when, then| {
        when.method(GET)
            .path("/api/manager/flow/flowcardtrigger/homey:manager:cron:time");
        then.status(200)
            .json_body(json!({"id": "homey:manager:cron:time", "tokens": [{"id": "time"}]}));
    });
    server.mock(|when, then| {
        when.method(GET).path(
            "/api/manager/flow/flowcardaction/homey:manager:notifications:create_notification",
        );
        then.status(200).json_body(json!({"id": "create_notification", "tokens": []}));
    });

    let home = TempDir::new().unwrap();
    homeyctl(&home)
        .args(["--address", server.base_url().as_str(), "--token", "t", "broken-flows"])
        .assert()
        .success()
        .stdout(predicates::str::contains("1 of 2 flows are broken"))
        .stdout(predicates::str::contains(
            "Missing Token: homey:device:gone:measure_power",
        ))
        .stdout(predicates::str::contains("\"Healthy\"").not());
}

#[test]
fn test_replace_device_dry_run_does_not_write() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/api/manager/flow/flow/");
        then.status(200).json_body(json!({
            "f1": {
                "id": "f1", "name": "Power",
                "trigger": {"id": "homey:manager:cron:time"},
                "conditions": [],
                "actions": [{"id": "homey:manager:logic:set_string",
                             "args": {"value": format!("[[homey:device:{}|measure_power]]", OLD)}}]
            }
        }));
    });
    server.mock(|when, then| {
        when.method(GET).path("/api/manager/flow/advancedflow/");
        then.status(200).json_body(json!({}));
    });
    let update = server.mock(|when, then| {
        when.method(PUT).path("/api/manager/flow/flow/f1");
        then.status(200).json_body(json!({}));
    });

    let home = TempDir::new().unwrap();
    homeyctl(&home)
        .args([
            "--address",
            server.base_url().as_str(),
            "--token",
            "t",
            "replace-device",
            "--map",
            format!("{}={}", OLD, NEW).as_str(),
        ])
        .assert()
        .success()
        .stdout(predicates::str::contains("Would update flow \"Power\""))
        .stdout(predicates::str::contains(NEW))
        .stdout(predicates::str::contains("1 of 1 flows changed"));

    update.assert_hits(0);
}

#[test]
fn test_no_nbsp_apply_writes_names() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/api/manager/devices/device/");
        then.status(200).json_body(json!({
            "d1": {"id": "d1", "name": "Hall\u{a0}light"}
        }));
    });
    server.mock(|when, then| {
        when.method(GET).path("/api/manager/logic/variable/");
        then.status(200).json_body(json!({}));
    });
    server.mock(|when, then| {
        when.method(GET).path("/api/manager/flow/flow/");
        then.status(200).json_body(json!({}));
    });
    let update = server.mock(|when, then| {
        when.method(PUT)
            .path("/api/manager/devices/device/d1")
            .json_body(json!({"name": "Hall light"}));
        then.status(200).json_body(json!({"id": "d1", "name": "Hall light"}));
    });

    let home = TempDir::new().unwrap();
    homeyctl(&home)
        .args(["--address", server.base_url().as_str(), "--token", "t", "no-nbsp", "--apply"])
        .assert()
        .success()
        .stdout(predicates::str::contains("1 of 1 devices changed"));

    update.assert();
}

#[test]
fn test_devices_json_prints_listing_as_sent() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/api/manager/devices/device/");
        then.status(200)
            .json_body(json!({"d1": {"id": "d1", "name": "Lamp", "zone": "z1"}}));
    });

    let home = TempDir::new().unwrap();
    homeyctl(&home)
        .args(["--address", server.base_url().as_str(), "--token", "t", "-o", "json", "devices"])
        .assert()
        .success()
        .stdout(predicates::str::contains(r#""zone":"z1""#))
        .stdout(predicates::str::contains("available").not())
        .stdout(predicates::str::contains("driverId").not());
}

#[test]
fn test_failed_write_does_not_stop_the_run() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/api/manager/devices/device/");
        then.status(200).json_body(json!({
            "d1": {"id": "d1", "name": "Hall\u{a0}light"},
            "d2": {"id": "d2", "name": "Porch\u{a0}light"}
        }));
    });
    server.mock(|when, then| {
        when.method(GET).path("/api/manager/logic/variable/");
        then.status(200).json_body(json!({}));
    });
    server.mock(|when, then| {
        when.method(GET).path("/api/manager/flow/flow/");
        then.status(200).json_body(json!({}));
    });
    let failing = server.mock(|when, then| {
        when.method(PUT).path("/api/manager/devices/device/d1");
        then.status(500).json_body(json!({"error": "device busy"}));
    });
    let second = server.mock(|when, then| {
        when.method(PUT)
            .path("/api/manager/devices/device/d2")
            .json_body(json!({"name": "Porch light"}));
        then.status(200).json_body(json!({"id": "d2", "name": "Porch light"}));
    });

    let home = TempDir::new().unwrap();
    homeyctl(&home)
        .args(["--address", server.base_url().as_str(), "--token", "t", "no-nbsp", "--apply"])
        .assert()
        .success()
        .stdout(predicates::str::contains("2 of 2 devices changed"));

    failing.assert_hits(1);
    second.assert_hits(1);
}

#[test]
fn test_broken_flows_without_global_tokens_skips_token_listing() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/api/manager/flow/flow/");
        then.status(200).json_body(json!({
            "f1": {
                "id": "f1", "name": "Power",
                "trigger": {"id": "homey:manager:cron:time"},
                "conditions": [],
                "actions": [{"id": "homey:manager:notifications:create_notification",
                             "args": {"text": "[[homey:device:abc|measure_power]]"}}]
            }
        }));
    });
    let tokens = server.mock(|when, then| {
        when.method(GET).path("/api/manager/flowtoken/flowtoken/");
        then.status(200).json_body(json!({
            "homey:device:abc:measure_power": {"id": "measure_power"}
        }));
    });
    server.mock(|when, then| {
        when.method(GET)
            .path("/api/manager/flow/flowcardtrigger/homey:manager:cron:time");
        then.status(200).json_body(json!({"id": "time", "tokens": []}));
    });
    server.mock(|when, then| {
        when.method(GET).path(
            "/api/manager/flow/flowcardaction/homey:manager:notifications:create_notification",
        );
        then.status(200).json_body(json!({"id": "create_notification", "tokens": []}));
    });

    let home = TempDir::new().unwrap();
    homeyctl(&home)
        .args([
            "--address",
            server.base_url().as_str(),
            "--token",
            "t",
            "broken-flows",
            "--no-global-tokens",
        ])
        .assert()
        .success()
        .stdout(predicates::str::contains("1 of 1 flows are broken"))
        .stdout(predicates::str::contains(
            "Missing Token: homey:device:abc:measure_power",
        ));

    tokens.assert_hits(0);
}

#[test]
fn test_broken_flows_json_keeps_hub_order_and_parses() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/api/manager/flow/flow/");
        then.status(200).json_body(json!({
            "zz": {"id": "zz", "name": "Listed first", "trigger": {"id": "gone"}},
            "aa": {"id": "aa", "name": "Listed second", "trigger": {"id": "gone"}}
        }));
    });
    server.mock(|when, then| {
        when.method(GET).path("/api/manager/flowtoken/flowtoken/");
        then.status(200).json_body(json!({}));
    });
    server.mock(|when, then| {
        when.method(GET).path("/api/manager/flow/flowcardtrigger/gone");
        then.status(404).json_body(json!({"error": "Not Found"}));
    });

    let home = TempDir::new().unwrap();
    let output = homeyctl(&home)
        .args(["--address", server.base_url().as_str(), "--token", "t", "-o", "json", "broken-flows"])
        .assert()
        .success()
        .stderr(predicates::str::contains("2 of 2 flows are broken"))
        .get_output()
        .stdout
        .clone();

    let broken: serde_json::Value = serde_json::from_slice(&output).unwrap();
    let ids: Vec<_> = broken
        .as_array()
        .unwrap()
        .iter()
        .map(|flow| flow["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec!["zz", "aa"]);
}

#[test]
fn test_replace_device_apply_updates_advanced_flow() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/api/manager/flow/flow/");
        then.status(200).json_body(json!({}));
    });
    server.mock(|when, then| {
        when.method(GET).path("/api/manager/flow/advancedflow/");
        then.status(200).json_body(json!({
            "af1": {
                "id": "af1", "name": "Night",
                "cards": {
                    "c1": {"type": "action", "ownerUri": format!("homey:device:{}", OLD),
                           "id": format!("homey:device:{}:off", OLD), "x": 10},
                    "c2": {"type": "delay", "args": {"delay": 5}}
                }
            }
        }));
    });
    let update = server.mock(|when, then| {
        when.method(PUT)
            .path("/api/manager/flow/advancedflow/af1")
            .json_body(json!({
                "cards": {
                    "c1": {"type": "action", "ownerUri": format!("homey:device:{}", NEW),
                           "id": format!("homey:device:{}:off", NEW), "x": 10},
                    "c2": {"type": "delay", "args": {"delay": 5}}
                }
            }));
        then.status(200).json_body(json!({"id": "af1"}));
    });

    let home = TempDir::new().unwrap();
    homeyctl(&home)
        .args([
            "--address",
            server.base_url().as_str(),
            "--token",
            "t",
            "replace-device",
            "--map",
            format!("{}={}", OLD, NEW).as_str(),
            "--apply",
        ])
        .assert()
        .success()
        .stdout(predicates::str::contains("1 of 1 advanced flows changed"));

    update.assert();
}
