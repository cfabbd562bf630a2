use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

use rust_xlsxwriter::Workbook;

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn write_fixture(path: &Path) {
    let mut workbook = Workbook::new();
    let ws = workbook.add_worksheet();
    ws.set_name("T10").expect("sheet name");
    let rows = [
        (4, "Nguyen Van A", 8.0, 150000.0, 1200000.0, "10A"),
        (5, "Tran Thi B", 4.0, 120000.0, 480000.0, ""),
        (6, "Le Van C", 10.0, 100000.0, 1000000.0, "10B"),
    ];
    for (row, name, sessions, price, fee, class) in rows {
        ws.write_string(row, 4, class).expect("class");
        ws.write_string(row, 38, name).expect("name");
        ws.write_number(row, 39, sessions).expect("sessions");
        ws.write_number(row, 40, price).expect("price");
        ws.write_number(row, 41, fee).expect("fee");
    }
    workbook.save(path).expect("save fixture");
}

fn spawn_sidecar(config: &Path) -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_receiptd");
    let mut child = Command::new(exe)
        .env("RECEIPTD_CONFIG", config)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn receiptd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn read_message(reader: &mut BufReader<ChildStdout>) -> serde_json::Value {
    let mut line = String::new();
    reader.read_line(&mut line).expect("read line");
    assert!(!line.trim().is_empty(), "sidecar closed stdout");
    serde_json::from_str(line.trim()).expect("parse json line")
}

/// Sends a request and returns its response. Events that arrive first are collected.
fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    events: &mut Vec<serde_json::Value>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    loop {
        let msg = read_message(reader);
        if msg.get("event").is_some() {
            events.push(msg);
            continue;
        }
        assert_eq!(msg.get("id").and_then(|v| v.as_str()), Some(id));
        return msg;
    }
}

fn result(resp: &serde_json::Value) -> &serde_json::Value {
    assert_eq!(resp.get("ok").and_then(|v| v.as_bool()), Some(true), "{}", resp);
    resp.get("result").expect("result")
}

fn error_code(resp: &serde_json::Value) -> &str {
    assert_eq!(resp.get("ok").and_then(|v| v.as_bool()), Some(false), "{}", resp);
    resp.get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
        .expect("error code")
}

#[test]
fn sidecar_serves_receipts_end_to_end() {
    let dir = temp_dir("receiptd-smoke");
    let out = dir.join("out");
    let xlsx = dir.join("hoc-phi.xlsx");
    write_fixture(&xlsx);
    let config = dir.join("receiptd.json");
    std::fs::write(
        &config,
        json!({
            "outputDir": out.to_string_lossy(),
            "batchIntervalMs": 0,
            "copiedTtlMs": 60000,
            "doneTtlMs": 60000,
        })
        .to_string(),
    )
    .expect("write config");

    let (mut child, mut stdin, mut reader) = spawn_sidecar(&config);
    let mut events = Vec::new();
    let ev = &mut events;

    let health = request(&mut stdin, &mut reader, ev, "1", "health", json!({}));
    assert_eq!(result(&health)["sheetLoaded"], false);

    let early = request(&mut stdin, &mut reader, ev, "2", "students.toggleCheck", json!({ "studentId": 1 }));
    assert_eq!(error_code(&early), "no_sheet");

    let load = request(
        &mut stdin,
        &mut reader,
        ev,
        "3",
        "sheet.load",
        json!({ "path": xlsx.to_string_lossy() }),
    );
    let load = result(&load).clone();
    assert_eq!(load["sheetName"], "T10");
    assert_eq!(load["studentCount"], 3);
    let load_id = load["loadId"].as_str().expect("loadId").to_string();

    let search = request(&mut stdin, &mut reader, ev, "4", "students.list", json!({ "search": "TRAN" }));
    let search = result(&search);
    assert_eq!(search["visible"], 1);
    assert_eq!(search["students"][0]["name"], "Tran Thi B");

    let all = request(&mut stdin, &mut reader, ev, "5", "students.list", json!({ "search": "" }));
    assert_eq!(result(&all)["visible"], 3);

    let toggled = request(
        &mut stdin,
        &mut reader,
        ev,
        "6",
        "students.toggleCheck",
        json!({ "studentId": 1, "loadId": load_id }),
    );
    assert_eq!(result(&toggled)["checked"], true);

    let stale = request(
        &mut stdin,
        &mut reader,
        ev,
        "7",
        "students.toggleCheck",
        json!({ "studentId": 1, "loadId": "not-the-current-load" }),
    );
    assert_eq!(error_code(&stale), "stale_sheet");

    let missing = request(&mut stdin, &mut reader, ev, "8", "receipt.select", json!({ "studentId": 99 }));
    assert_eq!(error_code(&missing), "not_found");

    let selected = request(&mut stdin, &mut reader, ev, "9", "receipt.select", json!({ "studentId": 2 }));
    let selected = result(&selected);
    assert!(selected["svg"].as_str().expect("svg").contains("Tran Thi B"));
    assert_eq!(selected["hidden"], json!(["paymentQr"]));

    let download = request(&mut stdin, &mut reader, ev, "10", "receipt.download", json!({}));
    let saved = PathBuf::from(result(&download)["path"].as_str().expect("path"));
    assert_eq!(saved, out.join("Tran Thi B.png"));
    let png = std::fs::read(&saved).expect("read download");
    assert!(png.starts_with(&[0x89, b'P', b'N', b'G']));

    let copy = request(&mut stdin, &mut reader, ev, "11", "receipt.copy", json!({}));
    assert!(result(&copy)["dataUrl"]
        .as_str()
        .expect("dataUrl")
        .starts_with("data:image/png;base64,"));

    let cards = request(&mut stdin, &mut reader, ev, "12", "students.list", json!({}));
    let cards = result(&cards);
    assert_eq!(cards["students"][1]["copied"], true);
    assert_eq!(cards["students"][1]["selected"], true);
    assert_eq!(cards["students"][0]["copied"], false);

    let set = request(
        &mut stdin,
        &mut reader,
        ev,
        "13",
        "students.setChecked",
        json!({ "studentIds": [1, 3], "checked": true }),
    );
    assert_eq!(result(&set)["checkedCount"], 2);

    let start = request(&mut stdin, &mut reader, ev, "14", "batch.start", json!({}));
    let start = result(&start).clone();
    assert_eq!(start["total"], 2);
    let job_id = start["jobId"].as_str().expect("jobId").to_string();

    let done = loop {
        if let Some(done) = ev
            .iter()
            .find(|e| e["event"] == "batch.done" && e["jobId"] == job_id.as_str())
        {
            break done.clone();
        }
        let msg = read_message(&mut reader);
        assert!(msg.get("event").is_some(), "unexpected response {}", msg);
        ev.push(msg);
    };
    assert_eq!(done["summary"]["exported"], 2);
    assert_eq!(done["summary"]["cancelled"], false);
    let progress: Vec<(u64, u64)> = ev
        .iter()
        .filter(|e| e["event"] == "batch.progress" && e["jobId"] == job_id.as_str())
        .map(|e| {
            (
                e["completed"].as_u64().expect("completed"),
                e["total"].as_u64().expect("total"),
            )
        })
        .collect();
    assert_eq!(progress, vec![(1, 2), (2, 2)]);
    assert!(out.join("Nguyen Van A_10A.png").exists());
    assert!(out.join("Le Van C_10B.png").exists());

    let status = request(&mut stdin, &mut reader, ev, "15", "batch.status", json!({}));
    assert_eq!(result(&status)["state"], "done");

    let unknown = request(&mut stdin, &mut reader, ev, "16", "receipt.print", json!({}));
    assert_eq!(error_code(&unknown), "not_implemented");

    writeln!(stdin, "{{not json").expect("write garbage");
    stdin.flush().expect("flush garbage");
    let bad = read_message(&mut reader);
    assert_eq!(error_code(&bad), "bad_json");

    let _ = request(&mut stdin, &mut reader, ev, "17", "sheet.reset", json!({}));
    let info = request(&mut stdin, &mut reader, ev, "18", "sheet.info", json!({}));
    assert_eq!(result(&info)["loaded"], false);

    drop(stdin);
    let status = child.wait().expect("wait for sidecar");
    assert!(status.success());

    let _ = std::fs::remove_dir_all(dir);
}

#[test]
fn org_update_changes_rendered_header() {
    let dir = temp_dir("receiptd-smoke-org");
    let xlsx = dir.join("hoc-phi.xlsx");
    write_fixture(&xlsx);
    let config = dir.join("receiptd.json");
    std::fs::write(&config, json!({ "org": { "bank": null } }).to_string()).expect("write config");

    let (mut child, mut stdin, mut reader) = spawn_sidecar(&config);
    let mut events = Vec::new();
    let ev = &mut events;

    let _ = request(
        &mut stdin,
        &mut reader,
        ev,
        "1",
        "sheet.load",
        json!({ "path": xlsx.to_string_lossy() }),
    );
    let empty = request(&mut stdin, &mut reader, ev, "2", "org.update", json!({}));
    assert_eq!(error_code(&empty), "bad_params");

    let updated = request(
        &mut stdin,
        &mut reader,
        ev,
        "3",
        "org.update",
        json!({ "name": "Trung tâm Ánh Dương" }),
    );
    assert_eq!(result(&updated)["org"]["name"], "Trung tâm Ánh Dương");
    assert!(result(&updated)["org"]["bank"].is_null());

    let preview = request(&mut stdin, &mut reader, ev, "4", "receipt.preview", json!({ "studentId": 1 }));
    let svg = result(&preview)["svg"].as_str().expect("svg").to_string();
    assert!(svg.contains("Trung tâm Ánh Dương"));
    assert!(!svg.contains("Thông tin thanh toán"));

    let no_target = request(&mut stdin, &mut reader, ev, "5", "receipt.download", json!({}));
    assert_eq!(error_code(&no_target), "bad_params");

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(dir);
}
