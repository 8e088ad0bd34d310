//! Consistency checker (spec §4.12), grounded on `examples/original_source`'s
//! `librepair/node.c` (per-node geometry/magic/item checks),
//! `librepair/filesystem.c` (top-down traversal, delimiting-key checks
//! against the parent) and `reiser4progs/fsck/fsck.c` (the pass structure:
//! walk the tree, rebuild a "what's actually reachable" bitmap, compare it
//! against the on-disk one).
//!
//! Unlike [`crate::tree::Tree`] this walks the device directly, one block
//! at a time, rather than through the cache — a checker has to work even
//! when the tree it's checking might not be safe to `lookup` into.

use crate::alloc::Bitmap;
use crate::device::{Block, Blk, Device};
use crate::error::{CoreError, RepairChoice};
use crate::item::internal40::Internal40;
use crate::item::{self, InternalItemOps, ItemKind};
use crate::key::Key;
use crate::node::{Level, Node};

/// One thing the checker found wrong, with enough context for a
/// [`RepairPolicy`] to decide what to do about it.
#[derive(Debug, Clone)]
pub struct Issue {
    pub block: Blk,
    pub description: String,
}

impl Issue {
    fn new(block: Blk, description: impl Into<String>) -> Self {
        Issue { block, description: description.into() }
    }
}

/// What the checker decided to do about one [`Issue`] (spec §4.12 "repair
/// policy is pluggable").
#[derive(Debug, Clone)]
pub struct Resolution {
    pub issue: Issue,
    pub choice: RepairChoice,
}

/// Final tally of one check pass (spec §4.12 `check` return value).
#[derive(Debug, Default, Clone)]
pub struct CheckReport {
    pub nodes_visited: u64,
    pub items_checked: u64,
    pub resolutions: Vec<Resolution>,
}

impl CheckReport {
    pub fn is_clean(&self) -> bool {
        self.resolutions.iter().all(|r| r.choice == RepairChoice::Leave)
    }
}

/// Decides how to resolve an [`Issue`] once found (spec §4.12). Given the
/// same issue twice a policy must return the same choice — the checker
/// never asks twice.
pub trait RepairPolicy {
    fn decide(&mut self, issue: &Issue) -> RepairChoice;
}

/// Fixes everything it can: drops unreadable items, trusts recomputed
/// geometry over stored geometry (spec §4.12 "aggressive" mode).
#[derive(Debug, Default)]
pub struct AlwaysRepair;

impl RepairPolicy for AlwaysRepair {
    fn decide(&mut self, issue: &Issue) -> RepairChoice {
        if issue.description.contains("length") {
            RepairChoice::TrustRecomputedLength
        } else if issue.description.contains("offset") {
            RepairChoice::TrustRecomputedOffset
        } else {
            RepairChoice::DropItem
        }
    }
}

/// Never changes anything on disk; every issue is just recorded (spec
/// §4.12 "read-only" mode, the default for a first fsck pass).
#[derive(Debug, Default)]
pub struct ReportOnly;

impl RepairPolicy for ReportOnly {
    fn decide(&mut self, _issue: &Issue) -> RepairChoice {
        RepairChoice::Leave
    }
}

/// Walks the tree rooted at `root_addr`, checking per-node geometry, per-item
/// validity and level legality, key ordering within a node, and delimiting
/// keys against the parent; tracks which blocks are actually reachable in a
/// secondary "control" bitmap, and finally compares it against the live
/// allocator bitmap (spec §4.12 "free block accounting must agree with
/// tree reachability").
pub struct Checker<'a> {
    device: &'a dyn Device,
    control: Bitmap,
}

impl<'a> Checker<'a> {
    pub fn new(device: &'a dyn Device) -> Self {
        Checker { control: Bitmap::new(device.len_blocks()), device }
    }

    /// Runs a full check pass starting at `root_addr`, resolving every issue
    /// found through `policy`. Returns the report; `bitmap` is updated in
    /// place to match what was actually found reachable whenever a
    /// resolution other than [`RepairChoice::Leave`] was taken on a
    /// bitmap-accounting issue.
    pub fn check(
        &mut self,
        root_addr: Blk,
        root_level: Level,
        bitmap: &mut Bitmap,
        policy: &mut dyn RepairPolicy,
    ) -> Result<CheckReport, CoreError> {
        let mut report = CheckReport::default();
        self.control.mark(root_addr)?;
        self.walk_node(root_addr, root_level, None, &mut report, policy)?;
        self.check_bitmap_accounting(bitmap, &mut report, policy)?;
        Ok(report)
    }

    fn walk_node(
        &mut self,
        addr: Blk,
        expected_level: Level,
        parent_delimiter: Option<&Key>,
        report: &mut CheckReport,
        policy: &mut dyn RepairPolicy,
    ) -> Result<(), CoreError> {
        report.nodes_visited += 1;

        let block = Block::read(self.device, addr)?;
        let node = match Node::open(block) {
            Ok(node) => node,
            Err(_) => {
                let issue = Issue::new(addr, "node failed to decode: bad magic or truncated header");
                report.resolutions.push(Resolution { choice: policy.decide(&issue), issue });
                return Ok(());
            }
        };

        if node.level() != expected_level {
            let issue = Issue::new(
                addr,
                format!("node level {} does not match its position in the tree (expected {expected_level})", node.level()),
            );
            report.resolutions.push(Resolution { choice: policy.decide(&issue), issue });
        }

        let view = node.as_v40();
        let mut previous_key: Option<Key> = None;
        let mut children = Vec::new();

        for pos in 0..view.count() {
            report.items_checked += 1;
            let item = view.item(pos)?;

            if let Some(prev) = previous_key {
                if item.key.compare_full(&prev) != std::cmp::Ordering::Greater {
                    let issue = Issue::new(addr, format!("item {pos} key does not strictly increase over its predecessor"));
                    report.resolutions.push(Resolution { choice: policy.decide(&issue), issue });
                }
            }
            if pos == 0 {
                if let Some(delim) = parent_delimiter {
                    if item.key.compare_full(delim) != std::cmp::Ordering::Equal {
                        let issue = Issue::new(addr, "node's first item key does not match its parent's delimiting key");
                        report.resolutions.push(Resolution { choice: policy.decide(&issue), issue });
                    }
                }
            }
            previous_key = Some(item.key);

            let kind = match ItemKind::from_plugin_id(item.plugin_id) {
                Ok(kind) => kind,
                Err(_) => {
                    let issue = Issue::new(addr, format!("item {pos} has unknown plugin id {}", item.plugin_id));
                    report.resolutions.push(Resolution { choice: policy.decide(&issue), issue });
                    continue;
                }
            };

            if !kind.legal_at_level(node.level()) {
                let issue = Issue::new(addr, format!("item {pos} of kind {kind:?} is not legal at level {}", node.level()));
                report.resolutions.push(Resolution { choice: policy.decide(&issue), issue });
            }

            let ops = item::dispatch(kind);
            if let Err(reason) = ops.check(item.body) {
                let issue = Issue::new(addr, format!("item {pos} failed its own plugin's check: {reason}"));
                report.resolutions.push(Resolution { choice: policy.decide(&issue), issue });
            }

            if kind == ItemKind::Internal {
                let target = Internal40.target(item.body)?;
                children.push((target, item.key));
            }
        }

        for (child_addr, delimiter) in children {
            if self.control.test(child_addr).unwrap_or(false) {
                let issue = Issue::new(
                    child_addr,
                    "block reached via more than one parent pointer (shared block or cycle)",
                );
                report.resolutions.push(Resolution { choice: policy.decide(&issue), issue });
                continue;
            }
            self.control.mark(child_addr)?;
            let child_level = node.level() - 1;
            self.walk_node(child_addr, child_level, Some(&delimiter), report, policy)?;
        }

        Ok(())
    }

    /// Compares the control bitmap (what the walk actually found reachable)
    /// against the live allocator bitmap, per spec §4.12's closing
    /// invariant: every block marked used must be reachable, and every
    /// reachable block must be marked used.
    fn check_bitmap_accounting(
        &self,
        bitmap: &mut Bitmap,
        report: &mut CheckReport,
        policy: &mut dyn RepairPolicy,
    ) -> Result<(), CoreError> {
        if self.control.count_used() == bitmap.count_used() {
            return Ok(());
        }
        let issue = Issue::new(
            0,
            format!(
                "bitmap accounts for {} used blocks but only {} are reachable from the tree",
                bitmap.count_used(),
                self.control.count_used()
            ),
        );
        let choice = policy.decide(&issue);
        if choice != RepairChoice::Leave {
            for addr in 0..bitmap.total() {
                let reachable = self.control.test(addr).unwrap_or(false);
                let marked = bitmap.test(addr).unwrap_or(false);
                if reachable && !marked {
                    bitmap.mark(addr)?;
                } else if marked && !reachable {
                    bitmap.clear(addr)?;
                }
            }
        }
        report.resolutions.push(Resolution { choice, issue });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::MemDevice;
    use crate::node::ItemHint;

    #[test]
    fn freshly_created_root_checks_clean() {
        let mut device = MemDevice::new(4096, 64);
        let mut bitmap = Bitmap::new(64);
        let mut env = crate::tree::TreeEnv { device: &mut device, bitmap: &mut bitmap };
        let mut tree = crate::tree::Tree::create(&mut env, 4096).unwrap();
        let root_addr = tree.root_addr();

        let key = Key::build_generic(crate::key::KeyType::StatData, 1, 2, 0);
        let body = crate::item::statdata40::create(&crate::item::statdata40::StatDataHint {
            mode: 0o644,
            nlink: 1,
            size: 0,
            unix_ext: None,
        });
        tree.insert(&mut env, ItemHint { key, plugin_id: ItemKind::StatData.plugin_id(), body })
            .unwrap();

        let mut checker = Checker::new(&device);
        let mut policy = ReportOnly;
        let report = checker.check(root_addr, tree.height(), &mut bitmap, &mut policy).unwrap();
        assert!(report.is_clean());
        assert!(report.items_checked >= 1);
    }

    #[test]
    fn detects_corrupted_magic() {
        let mut device = MemDevice::new(4096, 64);
        let mut bitmap = Bitmap::new(64);
        let mut env = crate::tree::TreeEnv { device: &mut device, bitmap: &mut bitmap };
        let tree = crate::tree::Tree::create(&mut env, 4096).unwrap();
        let root_addr = tree.root_addr();

        // Scribble over the root block's magic.
        let mut buf = vec![0u8; 4096];
        device.read(root_addr * 4096, &mut buf).unwrap();
        buf[7..11].copy_from_slice(&0xDEAD_BEEFu32.to_le_bytes());
        device.write(root_addr * 4096, &buf).unwrap();

        let mut checker = Checker::new(&device);
        let mut policy = ReportOnly;
        let report = checker.check(root_addr, tree.height(), &mut bitmap, &mut policy).unwrap();
        assert!(!report.is_clean());
    }
}
