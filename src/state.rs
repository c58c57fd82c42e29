use anyhow::{Context, Result};
use log::warn;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

pub const PURGE_AFTER_MS: i64 = 24 * 60 * 60 * 1000;

const POSITIONS_FILE: &str = "positions.json";
const COOLDOWN_FILE: &str = "cooldown.json";
const FORCE_REMOVE_FILE: &str = "force_remove.json";

// 单个链上仓位的跟踪记录
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PositionRecord {
    pub start_usd: f64,
    pub pool: String,
    pub owner: String,
    pub mint_x: String,
    pub created_at: i64,
    pub last_seen: i64,
    pub is_closed: bool,
    pub removed_at: Option<i64>,
    pub cooldown_until: Option<i64>,
    pub out_since: Option<i64>,
    pub out_of_range_triggered: bool,
    pub loss_count: u32,
    pub manual_triggered: bool,
    pub force_remove: bool,
    pub exit_failures: u32,
    pub last_exit_error: Option<String>,
}

impl PositionRecord {
    pub fn new(start_usd: f64, pool: &str, owner: &str, mint_x: &str, now: i64) -> Self {
        Self {
            start_usd,
            pool: pool.to_string(),
            owner: owner.to_string(),
            mint_x: mint_x.to_string(),
            created_at: now,
            last_seen: now,
            ..Self::default()
        }
    }

    // 只允许 false -> true 一次，返回是否发生了转换
    pub fn mark_closed(&mut self) -> bool {
        if self.is_closed {
            return false;
        }
        self.is_closed = true;
        true
    }

    pub fn closed_at(&self) -> i64 {
        self.removed_at.unwrap_or_else(|| self.last_seen.max(self.created_at))
    }

    pub fn is_active(&self) -> bool {
        !self.is_closed && self.removed_at.is_none()
    }

    pub fn set_cooldown_until(&mut self, until: i64) {
        self.cooldown_until = Some(self.cooldown_until.map_or(until, |cur| cur.max(until)));
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PositionStore {
    records: BTreeMap<String, PositionRecord>,
}

impl PositionStore {
    pub fn get(&self, key: &str) -> Option<&PositionRecord> {
        self.records.get(key)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut PositionRecord> {
        self.records.get_mut(key)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &PositionRecord)> {
        self.records.iter()
    }

    // 首次看到仓位时创建记录，已存在则保持不变
    pub fn track(&mut self, key: &str, record: PositionRecord) -> &mut PositionRecord {
        self.records.entry(key.to_string()).or_insert(record)
    }

    pub fn mark_closed(&mut self, key: &str) -> bool {
        self.records.get_mut(key).map_or(false, |r| r.mark_closed())
    }

    pub fn open_positions(&self) -> Vec<(String, PositionRecord)> {
        self.records
            .iter()
            .filter(|(_, r)| r.is_active())
            .map(|(k, r)| (k.clone(), r.clone()))
            .collect()
    }

    pub fn has_open_for(&self, pool: &str, owner: &str) -> bool {
        self.records.values().any(|r| r.pool == pool && r.owner == owner && !r.is_closed)
    }

    pub fn has_any_for(&self, pool: &str, owner: &str) -> bool {
        self.records.values().any(|r| r.pool == pool && r.owner == owner)
    }

    // 链上已经不存在的仓位标记为关闭
    pub fn reconcile(&mut self, pool: &str, owner: &str, present: &HashSet<String>) -> Vec<String> {
        let mut closed = vec![];
        for (key, record) in self.records.iter_mut() {
            if record.pool == pool && record.owner == owner && !present.contains(key) && record.mark_closed() {
                closed.push(key.clone());
            }
        }
        closed
    }

    // 删除关闭超过24小时的记录
    pub fn purge(&mut self, now: i64) -> usize {
        let before = self.records.len();
        self.records
            .retain(|_, r| !(r.is_closed && now - r.closed_at() > PURGE_AFTER_MS));
        before - self.records.len()
    }

    // 该代币最近一次平仓时的连续亏损次数
    pub fn loss_streak(&self, mint: &str, exclude: &str) -> u32 {
        self.records
            .iter()
            .filter(|(k, r)| r.mint_x == mint && k.as_str() != exclude && r.removed_at.is_some())
            .max_by_key(|(_, r)| r.closed_at())
            .map_or(0, |(_, r)| r.loss_count)
    }
}

// 代币 -> 冷却截止时间(毫秒)，只增不减
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CooldownTable(BTreeMap<String, i64>);

impl CooldownTable {
    pub fn until(&self, mint: &str) -> Option<i64> {
        self.0.get(mint).copied()
    }

    pub fn is_active(&self, mint: &str, now: i64) -> bool {
        self.until(mint).map_or(false, |until| until > now)
    }

    pub fn remaining_ms(&self, mint: &str, now: i64) -> i64 {
        self.until(mint).map_or(0, |until| (until - now).max(0))
    }

    pub fn extend(&mut self, mint: &str, until: i64) -> i64 {
        let entry = self.0.entry(mint.to_string()).or_insert(until);
        if until > *entry {
            *entry = until;
        }
        *entry
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ForceRemoveTable(BTreeMap<String, bool>);

impl ForceRemoveTable {
    pub fn is_forced(&self, key: &str) -> bool {
        self.0.get(key).copied().unwrap_or(false)
    }

    pub fn mark(&mut self, key: &str) {
        self.0.insert(key.to_string(), true);
    }

    pub fn clear(&mut self, key: &str) -> bool {
        self.0.remove(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.0.values().filter(|v| **v).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// 三张表的持久化。仓位表常驻内存，冷却表和强制移除表每次从磁盘读取，
// 因为维护工具会在运行期间直接修改它们
pub struct StateStore {
    dir: PathBuf,
    positions: Mutex<PositionStore>,
    tables: Mutex<()>,
}

impl StateStore {
    pub fn open(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir).with_context(|| format!("无法创建状态目录: {}", dir.display()))?;
        let positions: PositionStore = load_json(&dir.join(POSITIONS_FILE))?;
        Ok(Self {
            dir: dir.to_path_buf(),
            positions: Mutex::new(positions),
            tables: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn lock_positions(&self) -> MutexGuard<'_, PositionStore> {
        self.positions.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_tables(&self) -> MutexGuard<'_, ()> {
        self.tables.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn read_positions<R>(&self, f: impl FnOnce(&PositionStore) -> R) -> R {
        f(&self.lock_positions())
    }

    // 修改后立即整表写回
    pub fn update_positions<R>(&self, f: impl FnOnce(&mut PositionStore) -> R) -> Result<R> {
        let mut store = self.lock_positions();
        let result = f(&mut store);
        save_json(&self.dir.join(POSITIONS_FILE), &*store)?;
        Ok(result)
    }

    pub fn load_cooldowns(&self) -> Result<CooldownTable> {
        let _guard = self.lock_tables();
        load_json(&self.dir.join(COOLDOWN_FILE))
    }

    pub fn update_cooldowns<R>(&self, f: impl FnOnce(&mut CooldownTable) -> R) -> Result<R> {
        let _guard = self.lock_tables();
        let path = self.dir.join(COOLDOWN_FILE);
        let mut table: CooldownTable = load_json(&path)?;
        let result = f(&mut table);
        save_json(&path, &table)?;
        Ok(result)
    }

    pub fn extend_cooldown(&self, mint: &str, until: i64) -> Result<i64> {
        self.update_cooldowns(|table| table.extend(mint, until))
    }

    // 只读，文件损坏时按没有标记处理；写入路径仍然报错
    pub fn load_force_removals(&self) -> Result<ForceRemoveTable> {
        let _guard = self.lock_tables();
        let path = self.dir.join(FORCE_REMOVE_FILE);
        match load_json(&path) {
            Ok(table) => Ok(table),
            Err(e) => {
                warn!("⚠️ {:#}，按没有强制移除标记处理", e);
                Ok(ForceRemoveTable::default())
            }
        }
    }

    pub fn update_force_removals<R>(&self, f: impl FnOnce(&mut ForceRemoveTable) -> R) -> Result<R> {
        let _guard = self.lock_tables();
        let path = self.dir.join(FORCE_REMOVE_FILE);
        let mut table: ForceRemoveTable = load_json(&path)?;
        let result = f(&mut table);
        save_json(&path, &table)?;
        Ok(result)
    }

    // 把所有打开的仓位标记为强制移除，可选地给它们的代币加冷却；返回标记数量
    pub fn force_remove_open(&self, cooldown_until: Option<i64>) -> Result<usize> {
        let open = self.read_positions(|s| s.open_positions());
        if open.is_empty() {
            return Ok(0);
        }
        self.update_force_removals(|table| {
            for (key, _) in &open {
                table.mark(key);
            }
        })?;
        if let Some(until) = cooldown_until {
            self.update_cooldowns(|table| {
                for (_, record) in &open {
                    if !record.mint_x.is_empty() {
                        table.extend(&record.mint_x, until);
                    }
                }
            })?;
        }
        Ok(open.len())
    }
}

fn load_json<T: DeserializeOwned + Default>(path: &Path) -> Result<T> {
    if !path.exists() {
        return Ok(T::default());
    }
    let raw = fs::read_to_string(path).with_context(|| format!("无法读取文件: {}", path.display()))?;
    if raw.trim().is_empty() {
        return Ok(T::default());
    }
    // 损坏的文件不能当作空表，否则下一次写回会覆盖全部内容
    serde_json::from_str(&raw).with_context(|| format!("文件 {} 解析失败，请人工检查", path.display()))
}

// 先写临时文件再重命名，避免写到一半被读取
fn save_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, serde_json::to_string_pretty(value)?)
        .with_context(|| format!("无法写入文件: {}", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| format!("无法替换文件: {}", path.display()))?;
    Ok(())
}
