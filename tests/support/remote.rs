// ABOUTME: In-memory remote side of the copy sub-protocol.
// ABOUTME: MemorySink records pushed trees; MemorySource replays a tree as copy events.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet, VecDeque};
use tether::ssh::{Error, Result};
use tether::transfer::{CopyEvent, CopySink, CopySource};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteNode {
    File {
        mode: u32,
        data: Vec<u8>,
    },
    Dir {
        mode: u32,
        children: BTreeMap<String, RemoteNode>,
    },
}

impl RemoteNode {
    pub fn file(data: impl Into<Vec<u8>>) -> Self {
        RemoteNode::File {
            mode: 0o644,
            data: data.into(),
        }
    }

    pub fn dir<I, S>(children: I) -> Self
    where
        I: IntoIterator<Item = (S, RemoteNode)>,
        S: Into<String>,
    {
        RemoteNode::Dir {
            mode: 0o755,
            children: children.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }

    pub fn data(&self) -> Option<&[u8]> {
        match self {
            RemoteNode::File { data, .. } => Some(data),
            RemoteNode::Dir { .. } => None,
        }
    }

    pub fn child(&self, name: &str) -> Option<&RemoteNode> {
        match self {
            RemoteNode::Dir { children, .. } => children.get(name),
            RemoteNode::File { .. } => None,
        }
    }
}

/// Receives pushed trees in memory.
#[derive(Default)]
pub struct MemorySink {
    /// Top-level entries, by name.
    pub entries: BTreeMap<String, RemoteNode>,
    stack: Vec<String>,
    file: Option<(Vec<String>, u64)>,
    refuse_files: HashSet<String>,
    refuse_dirs: HashSet<String>,
    pub max_depth: usize,
    pub closed: usize,
    pub requests: usize,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer files with this name with a (non-fatal) remote warning.
    pub fn refuse_file(mut self, name: &str) -> Self {
        self.refuse_files.insert(name.to_string());
        self
    }

    /// Answer directories with this name with a fatal remote error.
    pub fn refuse_dir(mut self, name: &str) -> Self {
        self.refuse_dirs.insert(name.to_string());
        self
    }

    pub fn open_directories(&self) -> usize {
        self.stack.len()
    }

    fn container(&mut self, path: &[String]) -> Result<&mut BTreeMap<String, RemoteNode>> {
        let mut current = &mut self.entries;
        for name in path {
            match current.get_mut(name) {
                Some(RemoteNode::Dir { children, .. }) => current = children,
                _ => return Err(Error::Transfer(format!("no directory {name}"))),
            }
        }
        Ok(current)
    }

    fn insert(&mut self, name: &str, node: RemoteNode) -> Result<()> {
        let path = self.stack.clone();
        self.container(&path)?.insert(name.to_string(), node);
        Ok(())
    }

    fn check_name(name: &str) -> Result<()> {
        if name.is_empty() || name.contains(['/', '\n']) {
            return Err(Error::Transfer(format!("invalid entry name {name:?}")));
        }
        Ok(())
    }

    fn check_idle(&self) -> Result<()> {
        match &self.file {
            Some((path, remaining)) => Err(Error::Transfer(format!(
                "request while {remaining} bytes of {} are owed",
                path.join("/")
            ))),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl CopySink for MemorySink {
    async fn push_directory(&mut self, name: &str, mode: u32) -> Result<()> {
        self.requests += 1;
        self.check_idle()?;
        Self::check_name(name)?;
        if self.refuse_dirs.contains(name) {
            return Err(Error::Remote {
                fatal: true,
                message: format!("scp: {name}: Permission denied"),
            });
        }
        self.insert(
            name,
            RemoteNode::Dir {
                mode,
                children: BTreeMap::new(),
            },
        )?;
        self.stack.push(name.to_string());
        self.max_depth = self.max_depth.max(self.stack.len());
        Ok(())
    }

    async fn push_file(&mut self, name: &str, size: u64, mode: u32) -> Result<()> {
        self.requests += 1;
        self.check_idle()?;
        Self::check_name(name)?;
        if self.refuse_files.contains(name) {
            return Err(Error::Remote {
                fatal: false,
                message: format!("scp: {name}: Permission denied"),
            });
        }
        self.insert(
            name,
            RemoteNode::File {
                mode,
                data: Vec::new(),
            },
        )?;
        if size > 0 {
            let mut path = self.stack.clone();
            path.push(name.to_string());
            self.file = Some((path, size));
        }
        Ok(())
    }

    async fn write(&mut self, data: &[u8]) -> Result<()> {
        let Some((path, remaining)) = self.file.take() else {
            return Err(Error::Transfer("write without an announced file".into()));
        };
        if data.len() as u64 > remaining {
            return Err(Error::Transfer("write past announced size".into()));
        }
        let (name, parent) = path
            .split_last()
            .ok_or_else(|| Error::Transfer("empty path".into()))?;
        match self.container(parent)?.get_mut(name) {
            Some(RemoteNode::File { data: contents, .. }) => contents.extend_from_slice(data),
            _ => return Err(Error::Transfer("file vanished".into())),
        }
        let remaining = remaining - data.len() as u64;
        if remaining > 0 {
            self.file = Some((path, remaining));
        }
        Ok(())
    }

    async fn leave_directory(&mut self) -> Result<()> {
        self.requests += 1;
        self.check_idle()?;
        self.stack
            .pop()
            .map(|_| ())
            .ok_or_else(|| Error::Transfer("leave without enter".into()))
    }

    async fn close(&mut self) -> Result<()> {
        self.closed += 1;
        Ok(())
    }
}

/// One step of a scripted copy stream: an event and, for files, the bytes to send.
#[derive(Debug, Clone)]
pub struct Step {
    pub event: CopyEvent,
    pub data: Vec<u8>,
}

impl Step {
    pub fn event(event: CopyEvent) -> Self {
        Self {
            event,
            data: Vec::new(),
        }
    }
}

/// Flatten a tree into the events a remote `scp -f` would send for it.
pub fn tree_steps(name: &str, node: &RemoteNode) -> Vec<Step> {
    let mut steps = Vec::new();
    push_steps(name, node, &mut steps);
    steps
}

fn push_steps(name: &str, node: &RemoteNode, steps: &mut Vec<Step>) {
    match node {
        RemoteNode::File { mode, data } => steps.push(Step {
            event: CopyEvent::NewFile {
                name: name.to_string(),
                size: data.len() as u64,
                mode: *mode,
            },
            data: data.clone(),
        }),
        RemoteNode::Dir { mode, children } => {
            steps.push(Step::event(CopyEvent::NewDirectory {
                name: name.to_string(),
                mode: *mode,
            }));
            for (child_name, child) in children {
                push_steps(child_name, child, steps);
            }
            steps.push(Step::event(CopyEvent::EndDirectory));
        }
    }
}

/// Replays scripted steps as a copy source.
pub struct MemorySource {
    steps: VecDeque<Step>,
    pending: Option<Vec<u8>>,
    reading: Vec<u8>,
    offset: usize,
    /// Fail reads with a transport error once this many bytes were delivered.
    fail_after: Option<usize>,
    delivered: usize,
    pub accepted: usize,
    pub denied: Vec<String>,
    pub closed: usize,
}

impl MemorySource {
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            steps: steps.into(),
            pending: None,
            reading: Vec::new(),
            offset: 0,
            fail_after: None,
            delivered: 0,
            accepted: 0,
            denied: Vec::new(),
            closed: 0,
        }
    }

    pub fn from_tree(name: &str, node: &RemoteNode) -> Self {
        Self::new(tree_steps(name, node))
    }

    pub fn fail_after(mut self, bytes: usize) -> Self {
        self.fail_after = Some(bytes);
        self
    }
}

#[async_trait]
impl CopySource for MemorySource {
    async fn next_event(&mut self) -> Result<CopyEvent> {
        let Some(step) = self.steps.pop_front() else {
            return Ok(CopyEvent::EndOfStream);
        };
        if matches!(step.event, CopyEvent::NewFile { .. }) {
            self.pending = Some(step.data);
        }
        Ok(step.event)
    }

    async fn accept(&mut self) -> Result<()> {
        self.accepted += 1;
        if let Some(data) = self.pending.take() {
            self.reading = data;
            self.offset = 0;
        }
        Ok(())
    }

    async fn deny(&mut self, reason: &str) -> Result<()> {
        self.pending = None;
        self.denied.push(reason.to_string());
        Ok(())
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if let Some(limit) = self.fail_after
            && self.delivered >= limit
        {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "connection reset",
            )));
        }
        let available = &self.reading[self.offset..];
        let mut n = buf.len().min(available.len());
        if let Some(limit) = self.fail_after {
            n = n.min(limit - self.delivered);
        }
        buf[..n].copy_from_slice(&available[..n]);
        self.offset += n;
        self.delivered += n;
        Ok(n)
    }

    async fn close(&mut self) -> Result<()> {
        self.closed += 1;
        Ok(())
    }
}
