use crate::output::{print_json, print_table, truncate};
use anyhow::Context;
use clap::Subcommand;
use opsdeck_core::knowledge::AgentHub;
use serde_json::{json, Map, Value};
use std::path::Path;

// ---------------------------------------------------------------------------
// Subcommand types
// ---------------------------------------------------------------------------

#[derive(Subcommand)]
pub enum KbSubcommand {
    /// Store a value under a key (parsed as JSON, else kept as a string)
    Share {
        key: String,
        value: String,
        #[arg(long)]
        agent: String,
    },

    /// Print the value stored under a key
    Get { key: String },

    /// List every shared key
    List,

    /// Register an agent's areas of expertise
    Register {
        agent: String,
        /// Comma-separated topics
        #[arg(long, value_delimiter = ',', required = true)]
        expertise: Vec<String>,
    },

    /// Find the agent whose expertise covers a topic
    Expert { topic: String },

    /// Record what an agent is currently doing
    Activity {
        agent: String,
        activity: String,
        #[arg(long, default_value = "active")]
        status: String,
    },

    /// Send a message from one agent to another
    Send {
        #[arg(long)]
        from: String,
        #[arg(long)]
        to: String,
        message: String,
    },

    /// Show messages addressed to an agent
    Inbox {
        agent: String,
        /// Include messages already read
        #[arg(long)]
        all: bool,
    },

    /// Mark a message as read by its index
    Read { index: usize },

    /// Record a decision among agents
    Decide {
        #[arg(long)]
        topic: String,
        #[arg(long, value_delimiter = ',', required = true)]
        agents: Vec<String>,
        #[arg(long, value_delimiter = ',', required = true)]
        options: Vec<String>,
    },

    /// Show everything known about one agent
    Context { agent: String },

    /// One-paragraph summary of an agent's context
    Summary { agent: String },

    /// Show the broadcast log
    Broadcasts {
        #[arg(long, default_value = "20")]
        limit: usize,
    },
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub fn run(state: &Path, subcmd: KbSubcommand, json: bool) -> anyhow::Result<()> {
    let hub = AgentHub::open(state);
    match subcmd {
        KbSubcommand::Share { key, value, agent } => {
            let value = parse_value(&value);
            hub.share_knowledge(&agent, &key, value, None)
                .context("failed to update knowledge base")?;
            if json {
                print_json(&json!({ "key": key, "agent": agent }))?;
            } else {
                println!("Shared '{key}' as {agent}.");
            }
        }
        KbSubcommand::Get { key } => {
            let value = hub
                .get_knowledge(&key)
                .with_context(|| format!("no knowledge stored under '{key}'"))?;
            if json {
                print_json(&value)?;
            } else {
                match value {
                    Value::String(s) => println!("{s}"),
                    other => println!("{}", serde_json::to_string_pretty(&other)?),
                }
            }
        }
        KbSubcommand::List => {
            let all = hub.all_knowledge();
            if json {
                print_json(&all)?;
            } else if all.is_empty() {
                println!("Knowledge base is empty.");
            } else {
                let rows = all
                    .iter()
                    .map(|(k, e)| {
                        vec![
                            k.clone(),
                            e.agent.clone(),
                            e.timestamp.format("%Y-%m-%d %H:%M").to_string(),
                            e.value.to_string(),
                        ]
                    })
                    .collect();
                print_table(&["KEY", "AGENT", "UPDATED", "VALUE"], rows);
            }
        }
        KbSubcommand::Register { agent, expertise } => {
            hub.register_expertise(&agent, expertise.clone(), Map::new())
                .context("failed to update knowledge base")?;
            if json {
                print_json(&json!({ "agent": agent, "expertise": expertise }))?;
            } else {
                println!("Registered {agent}: {}", expertise.join(", "));
            }
        }
        KbSubcommand::Expert { topic } => {
            let expert = hub.find_expert(&topic);
            if json {
                print_json(&json!({ "topic": topic, "expert": expert }))?;
            } else {
                match expert {
                    Some(a) => println!("{a}"),
                    None => println!("No agent covers '{topic}'."),
                }
            }
        }
        KbSubcommand::Activity {
            agent,
            activity,
            status,
        } => {
            hub.update_activity(&agent, &activity, &status)
                .context("failed to update knowledge base")?;
            if json {
                print_json(&hub.activities())?;
            } else {
                println!("{agent}: {activity} ({status})");
            }
        }
        KbSubcommand::Send { from, to, message } => {
            hub.send_message(&from, &to, &message, None)
                .context("failed to update message log")?;
            if !json {
                println!("Message sent to {to}.");
            } else {
                print_json(&json!({ "from": from, "to": to }))?;
            }
        }
        KbSubcommand::Inbox { agent, all } => {
            let messages = hub.messages_for(&agent, !all);
            if json {
                let items: Vec<Value> = messages
                    .iter()
                    .map(|(i, m)| json!({ "index": i, "message": m }))
                    .collect();
                print_json(&items)?;
            } else if messages.is_empty() {
                println!("No messages for {agent}.");
            } else {
                let rows = messages
                    .iter()
                    .map(|(i, m)| {
                        vec![
                            i.to_string(),
                            m.from.clone(),
                            m.timestamp.format("%Y-%m-%d %H:%M").to_string(),
                            if m.read { "yes" } else { "no" }.to_string(),
                            m.message.clone(),
                        ]
                    })
                    .collect();
                print_table(&["#", "FROM", "SENT", "READ", "MESSAGE"], rows);
            }
        }
        KbSubcommand::Read { index } => {
            if !hub.mark_read(index).context("failed to update message log")? {
                anyhow::bail!("no message at index {index}");
            }
            if json {
                print_json(&json!({ "index": index, "read": true }))?;
            } else {
                println!("Marked message {index} as read.");
            }
        }
        KbSubcommand::Decide {
            topic,
            agents,
            options,
        } => {
            let decision = hub
                .collaborative_decision(&agents, &topic, &options)
                .context("failed to record decision")?;
            if json {
                print_json(&decision)?;
            } else {
                println!(
                    "{topic}: {}",
                    decision.final_decision.as_deref().unwrap_or("(no decision)")
                );
            }
        }
        KbSubcommand::Context { agent } => {
            let ctx = hub.agent_context(&agent);
            if json {
                print_json(&ctx)?;
            } else {
                print!("{}", hub.summarize(&agent));
                for (i, m) in &ctx.messages {
                    println!("  #{i} from {}: {}", m.from, truncate(&m.message, 80));
                }
                for d in &ctx.recent_decisions {
                    println!(
                        "  decided '{}': {}",
                        d.topic,
                        d.final_decision.as_deref().unwrap_or("-")
                    );
                }
            }
        }
        KbSubcommand::Summary { agent } => {
            let text = hub.summarize(&agent);
            if json {
                print_json(&json!({ "agent": agent, "summary": text }))?;
            } else {
                print!("{text}");
            }
        }
        KbSubcommand::Broadcasts { limit } => {
            let log = hub.broadcasts();
            let recent = &log[log.len().saturating_sub(limit)..];
            if json {
                print_json(&recent)?;
            } else if recent.is_empty() {
                println!("No broadcasts yet.");
            } else {
                let rows = recent
                    .iter()
                    .map(|b| {
                        vec![
                            b.timestamp.format("%Y-%m-%d %H:%M").to_string(),
                            b.agent.clone(),
                            b.priority.to_string(),
                            b.title.clone().unwrap_or_else(|| b.message.clone()),
                        ]
                    })
                    .collect();
                print_table(&["SENT", "AGENT", "PRIORITY", "MESSAGE"], rows);
            }
        }
    }
    Ok(())
}

/// JSON when it parses, otherwise the raw text as a string.
fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn values_parse_as_json_or_string() {
        assert_eq!(parse_value("42"), json!(42));
        assert_eq!(parse_value("{\"a\":1}"), json!({ "a": 1 }));
        assert_eq!(parse_value("hello world"), json!("hello world"));
    }
}
