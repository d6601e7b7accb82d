//! The HTTP surface driven end to end: dataset upload, conversion by the real
//! worker binary, and a training job run by a scripted trainer.

mod common;

use std::path::Path;
use std::time::Duration;

use common::{write_bag_root, FRONT_CAMERA, WRIST_CAMERA};
use episode_forge::api;
use episode_forge::app;
use episode_forge::config::ServiceConfig;
use serde_json::{json, Value};
use tokio::sync::oneshot;

const TRAINER: &str = r#"
    for a in "$@"; do
        case "$a" in --output_dir=*) out="${a#--output_dir=}";; esac
    done
    echo 'step 50/100'
    sleep 1
    mkdir -p "$out"
    echo weights > "$out/model.bin"
    echo 'step 100/100'
"#;

struct Server {
    base: String,
    client: reqwest::Client,
    shutdown: Option<oneshot::Sender<()>>,
}

impl Server {
    async fn start(root: &Path) -> Self {
        let config = ServiceConfig::new()
            .rooted_at(root)
            .with_worker_program(env!("CARGO_BIN_EXE_episode-forge"))
            .with_adoption_poll_interval(Duration::from_millis(50))
            .with_trainer(
                "sh",
                vec!["-c".to_string(), TRAINER.to_string(), "trainer".to_string()],
            );
        let service = app::start(&config).await.unwrap();

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let (tx, rx) = oneshot::channel::<()>();
        tokio::spawn(async move {
            api::serve(listener, service.state, async {
                let _ = rx.await;
            })
            .await
            .unwrap();
        });

        Self {
            base,
            client: reqwest::Client::new(),
            shutdown: Some(tx),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    async fn get(&self, path: &str) -> reqwest::Response {
        self.client.get(self.url(path)).send().await.unwrap()
    }

    async fn post(&self, path: &str) -> reqwest::Response {
        self.client.post(self.url(path)).send().await.unwrap()
    }

    async fn dataset(&self, name: &str) -> Value {
        self.get(&format!("/datasets/{}", name))
            .await
            .json()
            .await
            .unwrap()
    }

    async fn wait_dataset_status(&self, name: &str, want: &str) -> Value {
        for _ in 0..400 {
            let record = self.dataset(name).await;
            if record["status"] == want {
                return record;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("dataset {} never reached '{}'", name, want);
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

async fn upload_tree(server: &Server, dataset: &str, local_root: &Path) {
    for entry in walkdir::WalkDir::new(local_root) {
        let entry = entry.unwrap();
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry.path().strip_prefix(local_root).unwrap();
        let rel = rel.to_string_lossy().replace('\\', "/");
        let resp = server
            .client
            .post(server.url(&format!("/upload?filename={}/{}", dataset, rel)))
            .body(std::fs::read(entry.path()).unwrap())
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200, "upload {}", rel);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_dataset_conversion_and_training() {
    let dir = tempfile::tempdir().unwrap();
    let server = Server::start(&dir.path().join("service")).await;

    let health: Value = server.get("/health").await.json().await.unwrap();
    assert_eq!(health["status"], "ok");

    // Create and upload.
    let created = server.post("/create-dataset/?dataset_name=demo").await;
    assert_eq!(created.status(), 200);
    assert_eq!(server.post("/create-dataset/?dataset_name=demo").await.status(), 409);

    let fixtures = dir.path().join("fixtures");
    write_bag_root(&fixtures, 2, &[FRONT_CAMERA, WRIST_CAMERA], 10).await;
    upload_tree(&server, "demo", &fixtures).await;

    let listed: Value = server.get("/list?name=demo").await.json().await.unwrap();
    assert_eq!(listed["files"].as_array().unwrap().len(), 2);

    // Save triggers conversion in the worker binary.
    let saved: Value = server
        .post("/save-dataset/?dataset_name=demo")
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(saved["status"], "conversion");
    assert!(saved["worker_pid"].as_i64().unwrap() > 0);

    let record = server.wait_dataset_status("demo", "store").await;
    assert_eq!(record["num_episodes"], 2);
    assert_eq!(record["work_format"], "lerobot");

    // Uploads are closed once the dataset left creation.
    let late = server
        .client
        .post(server.url("/upload?filename=demo/late.db3"))
        .body("x")
        .send()
        .await
        .unwrap();
    assert_eq!(late.status(), 409);

    let info = server
        .get("/download?filename=demo/lerobot/meta/info.json")
        .await;
    assert_eq!(info.status(), 200);
    let info: Value = info.json().await.unwrap();
    assert_eq!(info["total_frames"], 20);

    // Training.
    let submitted: Value = server
        .client
        .post(server.url("/train"))
        .json(&json!({"dataset_name": "demo", "steps": 100, "device": "cpu"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let job_id = submitted["job_id"].as_str().unwrap().to_string();
    assert_eq!(submitted["status_url"], format!("/status/{}", job_id));

    let mut saw_half = false;
    let mut job = Value::Null;
    for _ in 0..400 {
        job = server
            .get(&format!("/status/{}", job_id))
            .await
            .json()
            .await
            .unwrap();
        if job["state"] == "running" && job["progress"] == 50.0 {
            saw_half = true;
        }
        if job["state"] == "finished" || job["state"] == "failed" {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(saw_half, "progress 50 never observed");
    assert_eq!(job["state"], "finished", "{}", job);
    assert_eq!(job["progress"], 100.0);

    let log: Value = server
        .get(&format!("/log/{}?lines=100", job_id))
        .await
        .json()
        .await
        .unwrap();
    assert!(log["log_tail"].as_str().unwrap().contains("step 50/100"));

    let weights: Value = server.get("/list?name=weights").await.json().await.unwrap();
    assert_eq!(weights["files"], json!([format!("{}.tar.gz", job_id)]));

    let preview: Value = server
        .get("/preview?file=weights&limit=5")
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(preview.as_array().unwrap().len(), 1);
    assert_eq!(preview[0]["dataset"], "demo");

    server.wait_dataset_status("demo", "store").await;

    let metrics = server.get("/metrics").await.text().await.unwrap();
    assert!(metrics.contains("forge_dataset_transitions_total"));
}

#[tokio::test]
async fn test_error_responses() {
    let dir = tempfile::tempdir().unwrap();
    let server = Server::start(dir.path()).await;

    let missing = server.post("/save-dataset/?dataset_name=ghost").await;
    assert_eq!(missing.status(), 404);
    let body: Value = missing.json().await.unwrap();
    assert_eq!(body["code"], "NOT_FOUND");

    let bad_name = server.post("/create-dataset/?dataset_name=..").await;
    assert_eq!(bad_name.status(), 400);

    let train = server
        .client
        .post(server.url("/train"))
        .json(&json!({"dataset_name": "ghost"}))
        .send()
        .await
        .unwrap();
    assert_eq!(train.status(), 404);

    assert_eq!(server.get("/status/deadbeef").await.status(), 404);
    assert_eq!(server.get("/preview?file=bogus").await.status(), 400);
    assert_eq!(server.get("/download?filename=ghost/x.db3").await.status(), 404);
}
