//! Shared knowledge base and inter-agent message log.
//!
//! Layout (inside the state directory):
//!   agent_knowledge_base.json   shared knowledge, expertise, activities,
//!                               context history, decisions, broadcast log
//!   agent_communication.json    point-to-point agent messages
//!
//! Every mutation takes the hub's mutex, re-reads the file it touches, applies
//! the change and writes the file back atomically. The lock is in-process
//! only; two separate processes can still race on the files.

use crate::error::Result;
use crate::notify::Priority;
use crate::{io, paths};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

pub const CONTEXT_HISTORY_CAP: usize = 1000;
pub const DECISIONS_CAP: usize = 100;
pub const BROADCAST_CAP: usize = 1000;
pub const MESSAGES_CAP: usize = 500;

/// Append `item`, evicting the oldest entries so that `log.len() <= cap`.
pub fn push_capped<T>(log: &mut Vec<T>, item: T, cap: usize) {
    log.push(item);
    if log.len() > cap {
        let excess = log.len() - cap;
        log.drain(..excess);
    }
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeEntry {
    pub value: Value,
    pub agent: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expertise {
    pub expertise: Vec<String>,
    #[serde(default)]
    pub capabilities: Map<String, Value>,
    pub registered_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Activity {
    pub activity: String,
    pub status: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextEvent {
    #[serde(rename = "type")]
    pub kind: String,
    pub agent: String,
    pub key: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub topic: String,
    pub agents: Vec<String>,
    pub options: Vec<String>,
    pub timestamp: DateTime<Utc>,
    pub votes: BTreeMap<String, Option<String>>,
    pub final_decision: Option<String>,
    pub reasoning: BTreeMap<String, String>,
}

/// A message fanned out to every webhook, kept for agents to read back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BroadcastRecord {
    pub agent: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub priority: Priority,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeBase {
    #[serde(default)]
    pub shared_knowledge: BTreeMap<String, KnowledgeEntry>,
    #[serde(default)]
    pub agent_expertise: BTreeMap<String, Expertise>,
    #[serde(default)]
    pub agent_activities: BTreeMap<String, Activity>,
    #[serde(default)]
    pub context_history: Vec<ContextEvent>,
    #[serde(default)]
    pub decisions: Vec<Decision>,
    #[serde(default)]
    pub messages: Vec<BroadcastRecord>,
    pub last_update: DateTime<Utc>,
}

impl Default for KnowledgeBase {
    fn default() -> Self {
        Self {
            shared_knowledge: BTreeMap::new(),
            agent_expertise: BTreeMap::new(),
            agent_activities: BTreeMap::new(),
            context_history: Vec::new(),
            decisions: Vec::new(),
            messages: Vec::new(),
            last_update: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentMessage {
    pub from: String,
    pub to: String,
    pub message: String,
    #[serde(default)]
    pub context: Map<String, Value>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub read: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommunicationLog {
    #[serde(default)]
    pub messages: Vec<AgentMessage>,
    pub last_update: DateTime<Utc>,
}

impl Default for CommunicationLog {
    fn default() -> Self {
        Self {
            messages: Vec::new(),
            last_update: Utc::now(),
        }
    }
}

/// Everything one agent needs to pick up where the others left off.
#[derive(Debug, Clone, Serialize)]
pub struct AgentContext {
    pub agent: String,
    pub expertise: Option<Expertise>,
    pub activity: Option<Activity>,
    /// `(index, message)` pairs; the index is what `mark_read` expects.
    pub messages: Vec<(usize, AgentMessage)>,
    pub shared_knowledge: BTreeMap<String, KnowledgeEntry>,
    pub recent_decisions: Vec<Decision>,
}

// ---------------------------------------------------------------------------
// AgentHub
// ---------------------------------------------------------------------------

struct HubState {
    kb: KnowledgeBase,
    comm: CommunicationLog,
}

pub struct AgentHub {
    kb_path: PathBuf,
    comm_path: PathBuf,
    state: Mutex<HubState>,
}

impl AgentHub {
    /// Open the hub rooted at `state_dir`. Missing or unreadable files start
    /// empty; nothing is written until the first mutation.
    pub fn open(state_dir: &Path) -> Self {
        let kb_path = paths::knowledge_base_path(state_dir);
        let comm_path = paths::communication_path(state_dir);
        let kb = io::read_json_or_none(&kb_path).unwrap_or_default();
        let comm = io::read_json_or_none(&comm_path).unwrap_or_default();
        Self {
            kb_path,
            comm_path,
            state: Mutex::new(HubState { kb, comm }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HubState> {
        // Poisoning is harmless: mutations re-read the file first.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn mutate_kb<R>(&self, f: impl FnOnce(&mut KnowledgeBase) -> R) -> Result<R> {
        let mut guard = self.lock();
        if let Some(fresh) = io::read_json_or_none(&self.kb_path) {
            guard.kb = fresh;
        }
        let out = f(&mut guard.kb);
        guard.kb.last_update = Utc::now();
        io::write_json(&self.kb_path, &guard.kb)?;
        Ok(out)
    }

    fn mutate_comm<R>(&self, f: impl FnOnce(&mut CommunicationLog) -> R) -> Result<R> {
        let mut guard = self.lock();
        if let Some(fresh) = io::read_json_or_none(&self.comm_path) {
            guard.comm = fresh;
        }
        let out = f(&mut guard.comm);
        guard.comm.last_update = Utc::now();
        io::write_json(&self.comm_path, &guard.comm)?;
        Ok(out)
    }

    pub fn knowledge_base(&self) -> KnowledgeBase {
        self.lock().kb.clone()
    }

    pub fn communication_log(&self) -> CommunicationLog {
        self.lock().comm.clone()
    }

    // -----------------------------------------------------------------------
    // Shared knowledge
    // -----------------------------------------------------------------------

    pub fn share_knowledge(
        &self,
        agent: &str,
        key: &str,
        value: Value,
        metadata: Option<Map<String, Value>>,
    ) -> Result<()> {
        self.mutate_kb(|kb| {
            let now = Utc::now();
            kb.shared_knowledge.insert(
                key.to_string(),
                KnowledgeEntry {
                    value,
                    agent: agent.to_string(),
                    timestamp: now,
                    metadata: metadata.unwrap_or_default(),
                },
            );
            push_capped(
                &mut kb.context_history,
                ContextEvent {
                    kind: "knowledge_share".to_string(),
                    agent: agent.to_string(),
                    key: key.to_string(),
                    timestamp: now,
                },
                CONTEXT_HISTORY_CAP,
            );
        })
    }

    pub fn get_knowledge(&self, key: &str) -> Option<Value> {
        self.lock()
            .kb
            .shared_knowledge
            .get(key)
            .map(|e| e.value.clone())
    }

    pub fn all_knowledge(&self) -> BTreeMap<String, KnowledgeEntry> {
        self.lock().kb.shared_knowledge.clone()
    }

    // -----------------------------------------------------------------------
    // Expertise and activity
    // -----------------------------------------------------------------------

    pub fn register_expertise(
        &self,
        agent: &str,
        expertise: Vec<String>,
        capabilities: Map<String, Value>,
    ) -> Result<()> {
        self.mutate_kb(|kb| {
            let now = Utc::now();
            kb.agent_expertise.insert(
                agent.to_string(),
                Expertise {
                    expertise,
                    capabilities,
                    registered_at: now,
                    last_activity: now,
                },
            );
        })
    }

    /// First agent (by name) whose expertise overlaps `topic` as a
    /// case-insensitive substring in either direction.
    pub fn find_expert(&self, topic: &str) -> Option<String> {
        let topic = topic.to_lowercase();
        let guard = self.lock();
        guard
            .kb
            .agent_expertise
            .iter()
            .find(|(_, e)| {
                e.expertise.iter().any(|exp| {
                    let exp = exp.to_lowercase();
                    !exp.is_empty() && (topic.contains(&exp) || exp.contains(&topic))
                })
            })
            .map(|(name, _)| name.clone())
    }

    pub fn update_activity(&self, agent: &str, activity: &str, status: &str) -> Result<()> {
        self.mutate_kb(|kb| {
            let now = Utc::now();
            kb.agent_activities.insert(
                agent.to_string(),
                Activity {
                    activity: activity.to_string(),
                    status: status.to_string(),
                    timestamp: now,
                },
            );
            if let Some(e) = kb.agent_expertise.get_mut(agent) {
                e.last_activity = now;
            }
        })
    }

    pub fn activities(&self) -> BTreeMap<String, Activity> {
        self.lock().kb.agent_activities.clone()
    }

    // -----------------------------------------------------------------------
    // Messages
    // -----------------------------------------------------------------------

    pub fn send_message(
        &self,
        from: &str,
        to: &str,
        message: &str,
        context: Option<Map<String, Value>>,
    ) -> Result<()> {
        self.mutate_comm(|comm| {
            push_capped(
                &mut comm.messages,
                AgentMessage {
                    from: from.to_string(),
                    to: to.to_string(),
                    message: message.to_string(),
                    context: context.unwrap_or_default(),
                    timestamp: Utc::now(),
                    read: false,
                },
                MESSAGES_CAP,
            );
        })
    }

    pub fn messages_for(&self, agent: &str, unread_only: bool) -> Vec<(usize, AgentMessage)> {
        self.lock()
            .comm
            .messages
            .iter()
            .enumerate()
            .filter(|(_, m)| m.to == agent && (!unread_only || !m.read))
            .map(|(i, m)| (i, m.clone()))
            .collect()
    }

    /// Mark the message at `index` as read. Returns false when out of range.
    pub fn mark_read(&self, index: usize) -> Result<bool> {
        {
            let guard = self.lock();
            if index >= guard.comm.messages.len() && !self.comm_path.exists() {
                return Ok(false);
            }
        }
        self.mutate_comm(|comm| match comm.messages.get_mut(index) {
            Some(m) => {
                m.read = true;
                true
            }
            None => false,
        })
    }

    // -----------------------------------------------------------------------
    // Decisions
    // -----------------------------------------------------------------------

    /// Record a decision among `agents`. Each agent currently backs the first
    /// option; the majority wins and ties go to the earliest vote.
    pub fn collaborative_decision(
        &self,
        agents: &[String],
        topic: &str,
        options: &[String],
    ) -> Result<Decision> {
        let mut votes = BTreeMap::new();
        let mut reasoning = BTreeMap::new();
        for agent in agents {
            votes.insert(agent.clone(), options.first().cloned());
            reasoning.insert(
                agent.clone(),
                format!("{agent} recommends based on registered expertise"),
            );
        }

        let mut tally: Vec<(String, usize)> = Vec::new();
        for agent in agents {
            if let Some(Some(choice)) = votes.get(agent) {
                match tally.iter_mut().find(|(c, _)| c == choice) {
                    Some((_, n)) => *n += 1,
                    None => tally.push((choice.clone(), 1)),
                }
            }
        }
        let mut final_decision: Option<(String, usize)> = None;
        for (choice, n) in tally {
            if final_decision.as_ref().map_or(true, |(_, best)| n > *best) {
                final_decision = Some((choice, n));
            }
        }

        let decision = Decision {
            topic: topic.to_string(),
            agents: agents.to_vec(),
            options: options.to_vec(),
            timestamp: Utc::now(),
            votes,
            final_decision: final_decision.map(|(c, _)| c),
            reasoning,
        };

        let recorded = decision.clone();
        self.mutate_kb(move |kb| push_capped(&mut kb.decisions, recorded, DECISIONS_CAP))?;
        Ok(decision)
    }

    // -----------------------------------------------------------------------
    // Broadcast log
    // -----------------------------------------------------------------------

    pub fn record_broadcast(&self, record: BroadcastRecord) -> Result<()> {
        self.mutate_kb(|kb| push_capped(&mut kb.messages, record, BROADCAST_CAP))
    }

    pub fn broadcasts(&self) -> Vec<BroadcastRecord> {
        self.lock().kb.messages.clone()
    }

    // -----------------------------------------------------------------------
    // Context
    // -----------------------------------------------------------------------

    pub fn agent_context(&self, agent: &str) -> AgentContext {
        let guard = self.lock();
        let kb = &guard.kb;
        let messages = guard
            .comm
            .messages
            .iter()
            .enumerate()
            .filter(|(_, m)| m.to == agent)
            .map(|(i, m)| (i, m.clone()))
            .collect();
        let shared_knowledge = kb
            .shared_knowledge
            .iter()
            .filter(|(_, e)| e.agent == agent)
            .map(|(k, e)| (k.clone(), e.clone()))
            .collect();
        let involved: Vec<&Decision> = kb
            .decisions
            .iter()
            .filter(|d| d.agents.iter().any(|a| a == agent))
            .collect();
        let recent_decisions = involved
            .iter()
            .skip(involved.len().saturating_sub(10))
            .map(|d| (*d).clone())
            .collect();

        AgentContext {
            agent: agent.to_string(),
            expertise: kb.agent_expertise.get(agent).cloned(),
            activity: kb.agent_activities.get(agent).cloned(),
            messages,
            shared_knowledge,
            recent_decisions,
        }
    }

    pub fn summarize(&self, agent: &str) -> String {
        let ctx = self.agent_context(agent);
        let mut out = format!("Context summary for {agent}\n\n");
        if let Some(e) = &ctx.expertise {
            out.push_str(&format!("Expertise: {}\n", e.expertise.join(", ")));
        }
        if let Some(a) = &ctx.activity {
            out.push_str(&format!("Activity: {} ({})\n", a.activity, a.status));
        }
        let unread = ctx.messages.iter().filter(|(_, m)| !m.read).count();
        if !ctx.messages.is_empty() {
            out.push_str(&format!(
                "Messages: {} ({} unread)\n",
                ctx.messages.len(),
                unread
            ));
        }
        if !ctx.shared_knowledge.is_empty() {
            out.push_str(&format!(
                "Shared knowledge: {} entries\n",
                ctx.shared_knowledge.len()
            ));
        }
        if !ctx.recent_decisions.is_empty() {
            out.push_str(&format!(
                "Involved in: {} decisions\n",
                ctx.recent_decisions.len()
            ));
        }
        out
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
