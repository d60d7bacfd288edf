//! A small namespace model that replay can be applied to.
//!
//! [`TreeModel`] implements [`ReplayOps`] over an in-memory directory
//! tree. It is strict: removing a missing name or creating an existing one
//! fails, so applying any record twice shows up as a replay error. Two
//! models can be compared through [`TreeModel::state`].

use std::collections::BTreeMap;
use std::sync::Arc;
use zil_codec::attr::{AT_GID, AT_MODE, AT_SIZE, AT_UID};
use zil_codec::{
    AclBody, AclCreateBody, AclV0Body, CreateBody, LinkBody, LogRecord, RemoveBody, RenameBody,
    SetattrBody, TruncateBody, WriteBody,
};
use zil_core::{ReplayOps, ZilError, ZilResult};
use zil_storage::{BlockDevice, IoPriority};

/// Attributes and contents of one object.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Node {
    /// Mode bits.
    pub mode: u64,
    /// Owner.
    pub uid: u64,
    /// Group.
    pub gid: u64,
    /// File contents, or the target of a symlink.
    pub data: Vec<u8>,
    /// Number of ACL updates applied.
    pub acl_updates: u64,
}

/// Comparable snapshot of a model.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TreeState {
    /// Directory entries: (directory object, name) to object.
    pub entries: BTreeMap<(u64, Vec<u8>), u64>,
    /// Objects by number.
    pub nodes: BTreeMap<u64, Node>,
}

/// Replay target backed by a [`TreeState`].
#[derive(Default)]
pub struct TreeModel {
    state: TreeState,
    device: Option<Arc<dyn BlockDevice>>,
    applied: u64,
    fail_after: Option<u64>,
}

impl TreeModel {
    /// Creates an empty model.
    pub fn new() -> Self {
        Self::default()
    }

    /// Lets the model read indirect write payloads from `device`.
    pub fn with_device(mut self, device: Arc<dyn BlockDevice>) -> Self {
        self.device = Some(device);
        self
    }

    /// Makes the model fail every record once `count` records were applied.
    ///
    /// Used to stop a replay part way, as a crash would.
    pub fn fail_after(&mut self, count: Option<u64>) {
        self.fail_after = count;
    }

    /// Number of records applied so far.
    pub fn applied(&self) -> u64 {
        self.applied
    }

    /// Returns the current state.
    pub fn state(&self) -> &TreeState {
        &self.state
    }

    /// Looks up a name in a directory.
    pub fn lookup(&self, dir: u64, name: &str) -> Option<u64> {
        self.state
            .entries
            .get(&(dir, name.as_bytes().to_vec()))
            .copied()
    }

    /// Returns an object's contents.
    pub fn contents(&self, object: u64) -> Option<&[u8]> {
        self.state.nodes.get(&object).map(|n| n.data.as_slice())
    }

    /// Returns an object's attributes.
    pub fn node(&self, object: u64) -> Option<&Node> {
        self.state.nodes.get(&object)
    }

    fn admit(&mut self, record: &LogRecord) -> ZilResult<()> {
        if self.fail_after.is_some_and(|n| self.applied >= n) {
            return Err(ZilError::replay(record.txtype, "stopped"));
        }
        self.applied += 1;
        Ok(())
    }

    fn enter(&mut self, record: &LogRecord, dir: u64, name: &[u8], object: u64) -> ZilResult<()> {
        let key = (dir, name.to_vec());
        if self.state.entries.contains_key(&key) {
            return Err(ZilError::replay(
                record.txtype,
                format!("{} already exists in {dir}", String::from_utf8_lossy(name)),
            ));
        }
        self.state.entries.insert(key, object);
        Ok(())
    }

    fn unlink(&mut self, record: &LogRecord, dir: u64, name: &[u8]) -> ZilResult<u64> {
        self.state
            .entries
            .remove(&(dir, name.to_vec()))
            .ok_or_else(|| {
                ZilError::replay(
                    record.txtype,
                    format!("{} not found in {dir}", String::from_utf8_lossy(name)),
                )
            })
    }

    fn release(&mut self, object: u64) {
        if !self.state.entries.values().any(|&o| o == object) {
            self.state.nodes.remove(&object);
        }
    }

    fn apply_create(&mut self, record: &LogRecord, body: &CreateBody) -> ZilResult<()> {
        let object = body.foid.object();
        self.enter(record, body.doid.object(), &body.name, object)?;
        self.state.nodes.insert(
            object,
            Node {
                mode: body.mode,
                uid: body.uid,
                gid: body.gid,
                data: body.link.clone().unwrap_or_default(),
                acl_updates: 0,
            },
        );
        Ok(())
    }

    fn payload(&self, record: &LogRecord, body: &WriteBody) -> ZilResult<Option<Vec<u8>>> {
        if !body.is_indirect() {
            return Ok(Some(body.data.clone()));
        }
        if body.blkptr.is_hole() {
            return Ok(None);
        }
        let device = self.device.as_ref().ok_or_else(|| {
            ZilError::replay(record.txtype, "indirect write without a block device")
        })?;
        let block = device.read_block(
            body.blkptr.locator,
            body.blkptr.lsize as usize,
            IoPriority::SyncRead,
        )?;
        let start = body.blkoff as usize;
        block
            .get(start..start + body.length as usize)
            .map(|s| Some(s.to_vec()))
            .ok_or_else(|| ZilError::replay(record.txtype, "indirect block too short"))
    }
}

impl std::fmt::Debug for TreeModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TreeModel")
            .field("entries", &self.state.entries.len())
            .field("nodes", &self.state.nodes.len())
            .field("applied", &self.applied)
            .finish()
    }
}

impl ReplayOps for TreeModel {
    fn create(&mut self, record: &LogRecord, body: &CreateBody) -> ZilResult<()> {
        self.admit(record)?;
        self.apply_create(record, body)
    }

    fn create_acl(&mut self, record: &LogRecord, body: &AclCreateBody) -> ZilResult<()> {
        self.admit(record)?;
        self.apply_create(record, &body.create)?;
        if let Some(node) = self.state.nodes.get_mut(&body.create.foid.object()) {
            node.acl_updates += 1;
        }
        Ok(())
    }

    fn remove(&mut self, record: &LogRecord, body: &RemoveBody) -> ZilResult<()> {
        self.admit(record)?;
        let object = self.unlink(record, body.doid.object(), &body.name)?;
        self.release(object);
        Ok(())
    }

    fn link(&mut self, record: &LogRecord, body: &LinkBody) -> ZilResult<()> {
        self.admit(record)?;
        self.enter(record, body.doid.object(), &body.name, body.link_obj.object())
    }

    fn rename(&mut self, record: &LogRecord, body: &RenameBody) -> ZilResult<()> {
        self.admit(record)?;
        let object = self.unlink(record, body.sdoid.object(), &body.src)?;
        if let Some(replaced) = self
            .state
            .entries
            .insert((body.tdoid.object(), body.tgt.clone()), object)
        {
            self.release(replaced);
        }
        Ok(())
    }

    fn write(&mut self, record: &LogRecord, body: &WriteBody) -> ZilResult<()> {
        self.admit(record)?;
        let Some(data) = self.payload(record, body)? else {
            return Ok(());
        };
        let node = self.state.nodes.entry(body.foid.object()).or_default();
        let start = body.offset as usize;
        let end = start + data.len();
        if node.data.len() < end {
            node.data.resize(end, 0);
        }
        node.data[start..end].copy_from_slice(&data);
        Ok(())
    }

    fn write2(&mut self, record: &LogRecord, body: &WriteBody) -> ZilResult<()> {
        self.admit(record)?;
        let node = self.state.nodes.entry(body.foid.object()).or_default();
        let end = (body.offset + body.length) as usize;
        if node.data.len() < end {
            node.data.resize(end, 0);
        }
        Ok(())
    }

    fn truncate(&mut self, record: &LogRecord, body: &TruncateBody) -> ZilResult<()> {
        self.admit(record)?;
        let node = self.state.nodes.entry(body.foid.object()).or_default();
        let start = (body.offset as usize).min(node.data.len());
        let end = body.offset.saturating_add(body.length);
        if end >= node.data.len() as u64 {
            node.data.truncate(start);
        } else {
            node.data[start..end as usize].fill(0);
        }
        Ok(())
    }

    fn setattr(&mut self, record: &LogRecord, body: &SetattrBody) -> ZilResult<()> {
        self.admit(record)?;
        let node = self.state.nodes.entry(body.foid.object()).or_default();
        if body.mask & AT_MODE != 0 {
            node.mode = body.mode;
        }
        if body.mask & AT_UID != 0 {
            node.uid = body.uid;
        }
        if body.mask & AT_GID != 0 {
            node.gid = body.gid;
        }
        if body.mask & AT_SIZE != 0 {
            node.data.resize(body.size as usize, 0);
        }
        Ok(())
    }

    fn acl_v0(&mut self, record: &LogRecord, body: &AclV0Body) -> ZilResult<()> {
        self.admit(record)?;
        self.state.nodes.entry(body.foid.object()).or_default().acl_updates += 1;
        Ok(())
    }

    fn acl(&mut self, record: &LogRecord, body: &AclBody) -> ZilResult<()> {
        self.admit(record)?;
        self.state.nodes.entry(body.foid.object()).or_default().acl_updates += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records;
    use zil_core::dispatch;

    fn apply(model: &mut TreeModel, records: &[LogRecord]) -> ZilResult<()> {
        records.iter().try_for_each(|r| dispatch(&mut *model, r))
    }

    #[test]
    fn namespace_operations() {
        let mut model = TreeModel::new();
        apply(
            &mut model,
            &[
                records::create(4, "a", 10),
                records::link(4, "b", 10),
                records::rename(4, "a", 4, "c"),
                records::remove(4, "b"),
            ],
        )
        .unwrap();
        assert_eq!(model.lookup(4, "a"), None);
        assert_eq!(model.lookup(4, "c"), Some(10));
        assert!(model.node(10).is_some());
        assert_eq!(model.applied(), 4);
    }

    #[test]
    fn double_create_is_detected() {
        let mut model = TreeModel::new();
        let create = records::create(4, "a", 10);
        apply(&mut model, &[create.clone()]).unwrap();
        assert!(matches!(
            dispatch(&mut model, &create),
            Err(ZilError::Replay { .. })
        ));
    }

    #[test]
    fn last_unlink_releases_object() {
        let mut model = TreeModel::new();
        apply(&mut model, &[records::create(4, "a", 10), records::remove(4, "a")]).unwrap();
        assert!(model.node(10).is_none());
        assert!(dispatch(&mut model, &records::remove(4, "a")).is_err());
    }

    #[test]
    fn data_operations() {
        let mut model = TreeModel::new();
        apply(
            &mut model,
            &[
                records::create(4, "f", 10),
                records::write(10, 2, b"abcdef"),
                records::truncate(10, 3, 2),
            ],
        )
        .unwrap();
        assert_eq!(model.contents(10), Some(&b"\0\0a\0\0def"[..]));
        apply(&mut model, &[records::truncate(10, 4, 100)]).unwrap();
        assert_eq!(model.contents(10), Some(&b"\0\0a\0"[..]));
        apply(&mut model, &[records::write2(10, 0, 6), records::setattr_mode(10, 0o600)]).unwrap();
        assert_eq!(model.contents(10).map(<[u8]>::len), Some(6));
        assert_eq!(model.node(10).map(|n| n.mode), Some(0o600));
        apply(&mut model, &[records::setattr_size(10, 1)]).unwrap();
        assert_eq!(model.contents(10), Some(&b"\0"[..]));
    }

    #[test]
    fn symlink_keeps_target() {
        let mut model = TreeModel::new();
        apply(&mut model, &[records::symlink(4, "s", 12, "../t")]).unwrap();
        assert_eq!(model.contents(12), Some(&b"../t"[..]));
    }

    #[test]
    fn hole_write_is_a_no_op() {
        let mut model = TreeModel::new();
        apply(&mut model, &[records::write_intent(10, 0, 4096)]).unwrap();
        assert!(model.node(10).is_none());
    }

    #[test]
    fn stops_after_budget() {
        let mut model = TreeModel::new();
        model.fail_after(Some(1));
        apply(&mut model, &[records::create(4, "a", 10)]).unwrap();
        assert!(dispatch(&mut model, &records::create(4, "b", 11)).is_err());
        assert_eq!(model.lookup(4, "b"), None);
        model.fail_after(None);
        apply(&mut model, &[records::create(4, "b", 11)]).unwrap();
        assert_eq!(model.applied(), 2);
    }
}
