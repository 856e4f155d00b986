//! 集成测试共用的内存版源存储和目标存储

#![allow(dead_code)]

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lakesync::storage::{LakeStore, ObjectInfo, ObjectPage, ObjectSource, PathMeta};
use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::hash::{Hash, Hasher};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// 内容指纹，模拟 ETag
pub fn fingerprint(body: &[u8]) -> String {
    let mut hasher = DefaultHasher::new();
    body.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

/// 按 key 有序的内存桶
#[derive(Default)]
pub struct FakeSource {
    objects: Mutex<BTreeMap<String, (ObjectInfo, Vec<u8>)>>,
    failing_reads: Mutex<HashSet<String>>,
    read_delay: Option<Duration>,
    stuck_cursor: bool,
    failing_list: bool,
    panicking_reads: Mutex<HashSet<String>>,
    list_counter: Option<Arc<AtomicUsize>>,
    pub counts_at_list: Mutex<Vec<usize>>,
    pub list_calls: AtomicUsize,
    pub reads: AtomicUsize,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl FakeSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// 每次读取都先写出内容再等待，用于观察并发和超时
    pub fn with_read_delay(mut self, delay: Duration) -> Self {
        self.read_delay = Some(delay);
        self
    }

    /// 截断页返回的 next_marker 不前进
    pub fn with_stuck_cursor(mut self) -> Self {
        self.stuck_cursor = true;
        self
    }

    /// 每次列举都返回服务端错误
    pub fn with_failing_list(mut self) -> Self {
        self.failing_list = true;
        self
    }

    /// 每次列举时记录 counter 的当前值
    pub fn with_list_counter(mut self, counter: Arc<AtomicUsize>) -> Self {
        self.list_counter = Some(counter);
        self
    }

    pub fn put(&self, key: &str, body: &[u8], last_modified: DateTime<Utc>) -> ObjectInfo {
        let info = ObjectInfo::new(key, last_modified, body.len() as u64)
            .with_fingerprint(fingerprint(body));
        self.objects
            .lock()
            .unwrap()
            .insert(key.to_string(), (info.clone(), body.to_vec()));
        info
    }

    /// 目录占位对象：没有内容，也没有指纹
    pub fn put_marker(&self, key: &str) {
        let info = ObjectInfo::new(key, Utc::now(), 0);
        self.objects
            .lock()
            .unwrap()
            .insert(key.to_string(), (info, Vec::new()));
    }

    pub fn fail_reads_for(&self, key: &str) {
        self.failing_reads.lock().unwrap().insert(key.to_string());
    }

    /// 读取该 key 时任务直接 panic
    pub fn panic_reads_for(&self, key: &str) {
        self.panicking_reads.lock().unwrap().insert(key.to_string());
    }
}

#[async_trait]
impl ObjectSource for FakeSource {
    async fn list_page(&self, marker: Option<&str>, page_size: usize) -> Result<ObjectPage> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(counter) = &self.list_counter {
            self.counts_at_list
                .lock()
                .unwrap()
                .push(counter.load(Ordering::SeqCst));
        }
        if self.failing_list {
            return Err(anyhow!("503 SlowDown: please reduce your request rate"));
        }

        let objects = self.objects.lock().unwrap();
        let mut remaining = objects
            .iter()
            .filter(|(key, _)| marker.map_or(true, |m| key.as_str() > m))
            .map(|(_, (info, _))| info.clone());

        let page_objects: Vec<ObjectInfo> = remaining.by_ref().take(page_size).collect();
        let is_truncated = remaining.next().is_some();

        let next_marker = if self.stuck_cursor {
            marker.map(String::from)
        } else {
            page_objects.last().map(|o| o.key.clone())
        };

        Ok(ObjectPage {
            objects: page_objects,
            next_marker,
            is_truncated,
        })
    }

    async fn read_to_file(&self, key: &str, local_path: &Path) -> Result<u64> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.failing_reads.lock().unwrap().contains(key) {
            return Err(anyhow!("NoSuchKey: {}", key));
        }
        if self.panicking_reads.lock().unwrap().contains(key) {
            panic!("读取 {} 时崩溃", key);
        }

        let body = self
            .objects
            .lock()
            .unwrap()
            .get(key)
            .map(|(_, body)| body.clone())
            .ok_or_else(|| anyhow!("NoSuchKey: {}", key))?;
        tokio::fs::write(local_path, &body).await?;

        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        if let Some(delay) = self.read_delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        Ok(body.len() as u64)
    }

    fn name(&self) -> &str {
        "fake-bucket"
    }
}

/// 内存版目标湖，写入时以当前时间作为修改时间
#[derive(Default)]
pub struct FakeLake {
    files: Mutex<BTreeMap<String, (Vec<u8>, DateTime<Utc>)>>,
    dirs: Mutex<BTreeSet<String>>,
    failing_stats: Mutex<HashSet<String>>,
    failing_writes: Mutex<HashSet<String>>,
    failing_dirs: Mutex<HashSet<String>>,
    pub stats: AtomicUsize,
    pub writes: Arc<AtomicUsize>,
}

impl FakeLake {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_existing(&self, path: &str, body: &[u8], modified_time: DateTime<Utc>) {
        self.files
            .lock()
            .unwrap()
            .insert(path.to_string(), (body.to_vec(), modified_time));
    }

    /// stat 该路径时返回非 NotFound 的错误
    pub fn fail_stat_for(&self, path: &str) {
        self.failing_stats.lock().unwrap().insert(path.to_string());
    }

    pub fn fail_writes_for(&self, path: &str) {
        self.failing_writes.lock().unwrap().insert(path.to_string());
    }

    pub fn fail_create_dir_for(&self, path: &str) {
        self.failing_dirs.lock().unwrap().insert(path.to_string());
    }

    pub fn contents(&self, path: &str) -> Option<Vec<u8>> {
        self.files
            .lock()
            .unwrap()
            .get(path)
            .map(|(body, _)| body.clone())
    }

    pub fn paths(&self) -> Vec<String> {
        self.files.lock().unwrap().keys().cloned().collect()
    }

    pub fn has_dir(&self, path: &str) -> bool {
        self.dirs.lock().unwrap().contains(path)
    }
}

#[async_trait]
impl LakeStore for FakeLake {
    async fn stat(&self, path: &str) -> Result<Option<PathMeta>> {
        self.stats.fetch_add(1, Ordering::SeqCst);
        if self.failing_stats.lock().unwrap().contains(path) {
            return Err(anyhow!("403 AuthorizationFailure: {}", path));
        }
        if let Some((body, modified_time)) = self.files.lock().unwrap().get(path) {
            return Ok(Some(PathMeta {
                size: body.len() as u64,
                modified_time: Some(*modified_time),
                is_dir: false,
            }));
        }
        if self.dirs.lock().unwrap().contains(path) {
            return Ok(Some(PathMeta {
                size: 0,
                modified_time: None,
                is_dir: true,
            }));
        }
        Ok(None)
    }

    async fn create_dir_all(&self, path: &str) -> Result<()> {
        if self.failing_dirs.lock().unwrap().contains(path) {
            return Err(anyhow!("409 PathConflict: {}", path));
        }
        let mut dirs = self.dirs.lock().unwrap();
        let mut current = String::new();
        for segment in path.split('/') {
            if !current.is_empty() {
                current.push('/');
            }
            current.push_str(segment);
            dirs.insert(current.clone());
        }
        Ok(())
    }

    async fn write_file(&self, path: &str, local_path: &Path) -> Result<u64> {
        if self.failing_writes.lock().unwrap().contains(path) {
            return Err(anyhow!("500 InternalError: 写入 {} 失败", path));
        }
        let body = tokio::fs::read(local_path).await?;
        let len = body.len() as u64;
        self.files
            .lock()
            .unwrap()
            .insert(path.to_string(), (body, Utc::now()));
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(len)
    }

    fn name(&self) -> &str {
        "fake-lake"
    }
}
