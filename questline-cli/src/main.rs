use anyhow::{bail, Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use questline_core::{
    multiplier_for, parse_recurrence, preview_award, time, Category, CompletionResult, NewTask,
    QuestEngine, SystemClock, Task, TaskPatch, UnlockedAchievement, XP_PER_LEVEL,
};

mod config;
mod state;

use config::Config;
use state::JsonFileStore;

type Engine = QuestEngine<JsonFileStore, SystemClock>;

#[derive(Parser, Debug)]
#[command(
    name = "questline",
    version,
    long_version = concat!(env!("CARGO_PKG_VERSION"), " (", env!("QUESTLINE_BUILD_SHA"), ")"),
    about = "Questline: finish real tasks, earn XP, gold and achievements"
)]
struct Cli {
    /// Debug logging (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write ~/.questline/config.toml with defaults
    Init {
        #[arg(long)]
        user: Option<String>,
        /// IANA timezone, e.g. America/Chicago
        #[arg(long)]
        tz: Option<String>,
    },

    #[command(flatten)]
    Quest(QuestCommand),
}

/// Commands that work against the quest store.
#[derive(Subcommand, Debug)]
enum QuestCommand {
    /// Create a quest
    Add {
        title: String,
        #[arg(long)]
        description: Option<String>,
        /// main | side | daily
        #[arg(long, default_value = "side")]
        category: Category,
        /// 1..=5
        #[arg(long, default_value_t = 3)]
        priority: u8,
        /// 1..=5; decides the XP/gold payout
        #[arg(long, default_value_t = 1)]
        difficulty: u8,
        /// Local due date: "YYYY-MM-DD HH:MM" or "YYYY-MM-DD"
        #[arg(long)]
        due: Option<String>,
        /// daily | weekly/2/mon,thu | monthly/3
        #[arg(long)]
        repeat: Option<String>,
        /// Parent quest id (makes this a subtask)
        #[arg(long)]
        parent: Option<String>,
        #[arg(long)]
        color: Option<String>,
    },

    /// Mark a quest as in progress
    Start { id: String },

    /// Complete a quest and collect rewards
    Done {
        id: String,
        /// Print the completion event as JSON
        #[arg(long)]
        json: bool,
    },

    /// Edit a quest (changing difficulty refreezes its reward)
    Edit {
        id: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        category: Option<Category>,
        #[arg(long)]
        priority: Option<u8>,
        #[arg(long)]
        difficulty: Option<u8>,
        #[arg(long, conflicts_with = "clear_due")]
        due: Option<String>,
        #[arg(long)]
        clear_due: bool,
        #[arg(long, conflicts_with = "clear_repeat")]
        repeat: Option<String>,
        #[arg(long)]
        clear_repeat: bool,
    },

    /// Cancel a quest
    Cancel { id: String },

    /// Delete a quest and its subtasks
    Rm { id: String },

    /// Mark past-due quests overdue
    Sweep,

    /// List quests
    List {
        /// Include completed and cancelled quests
        #[arg(long)]
        all: bool,
    },

    /// Quests to work on today
    Today,

    /// Record today's activity for the streak
    Checkin {
        /// Local date (YYYY-MM-DD); defaults to today
        #[arg(long)]
        date: Option<NaiveDate>,
    },

    /// Level, XP, gold and streak
    Status,

    /// Achievement catalog with your progress
    Achievements,
}

fn init_logging(cfg: &Config, verbose: bool) {
    let level = if verbose { "debug" } else { cfg.log.level.as_str() };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config()?;
    init_logging(&cfg, cli.verbose);

    match cli.command {
        Command::Init { user, tz } => config::init_config(user, tz),
        Command::Quest(command) => run(command, &cfg),
    }
}

fn run(command: QuestCommand, cfg: &Config) -> Result<()> {
    let tz = cfg.timezone()?;
    let store = JsonFileStore::open(state::store_path()?);
    tracing::debug!(store = %store.path().display(), user = %cfg.user.id, "opened store");
    let engine = QuestEngine::new(store, SystemClock).with_timezone(tz);
    let user = cfg.user.id.as_str();

    match command {
        QuestCommand::Add {
            title,
            description,
            category,
            priority,
            difficulty,
            due,
            repeat,
            parent,
            color,
        } => {
            let parent = parent.map(|p| resolve_id(&engine, user, &p)).transpose()?;
            let input = NewTask {
                title,
                description,
                category,
                priority,
                difficulty,
                due_date: due.map(|d| parse_due(&d, cfg)).transpose()?,
                recurrence: repeat.map(|r| parse_recurrence(&r)).transpose()?,
                color,
                parent_task_id: parent,
            };
            let task = engine.create_task(user, input)?;
            println!("Created {}", short(&task));

            let me = engine.user_state(user)?;
            if let Some(award) = preview_award(&task, &me) {
                println!(
                    "Worth {} XP (+{} streak bonus) and {} gold at your current streak",
                    award.base.xp, award.bonus_xp, award.total.gold
                );
            }
        }

        QuestCommand::Start { id } => {
            let task = engine.start_task(&resolve_id(&engine, user, &id)?)?;
            println!("Started {}", short(&task));
        }

        QuestCommand::Done { id, json } => {
            let res = engine.complete_task(&resolve_id(&engine, user, &id)?)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&res)?);
            } else {
                print_completion(&res);
            }
        }

        QuestCommand::Edit {
            id,
            title,
            description,
            category,
            priority,
            difficulty,
            due,
            clear_due,
            repeat,
            clear_repeat,
        } => {
            let due_date = match (due, clear_due) {
                (Some(d), _) => Some(Some(parse_due(&d, cfg)?)),
                (None, true) => Some(None),
                (None, false) => None,
            };
            let recurrence = match (repeat, clear_repeat) {
                (Some(r), _) => Some(Some(parse_recurrence(&r)?)),
                (None, true) => Some(None),
                (None, false) => None,
            };
            let patch = TaskPatch {
                title,
                description: description.map(Some),
                category,
                priority,
                difficulty,
                due_date,
                recurrence,
                color: None,
            };
            if patch.is_empty() {
                bail!("nothing to change (see `questline edit --help`)");
            }
            let task = engine.update_task(&resolve_id(&engine, user, &id)?, patch)?;
            println!("Updated {}", short(&task));
        }

        QuestCommand::Cancel { id } => {
            let task = engine.cancel_task(&resolve_id(&engine, user, &id)?)?;
            println!("Cancelled {}", short(&task));
        }

        QuestCommand::Rm { id } => {
            let deleted = engine.delete_task(&resolve_id(&engine, user, &id)?)?;
            println!("Deleted {} quest(s)", deleted.len());
        }

        QuestCommand::Sweep => {
            let n = engine.sweep_overdue(engine.now())?;
            println!("{n} quest(s) newly overdue");
        }

        QuestCommand::List { all } => {
            let tasks = engine.list_tasks(user)?;
            let shown: Vec<&Task> = tasks
                .iter()
                .filter(|t| all || !t.status.is_terminal())
                .collect();
            if shown.is_empty() {
                println!("No quests. Add one: questline add \"<title>\"");
            }
            for t in shown {
                print_task_line(t, cfg);
            }
        }

        QuestCommand::Today => {
            let tasks = engine.todays_tasks(user)?;
            println!("# Today ({})\n", engine.today());
            if tasks.is_empty() {
                println!("Nothing due. Enjoy the side quests.");
            }
            for t in &tasks {
                print_task_line(t, cfg);
            }
        }

        QuestCommand::Checkin { date } => {
            let day = date.unwrap_or_else(|| engine.today());
            let res = engine.check_in(user, day)?;
            if res.streak_changed {
                println!("Streak: {} day(s)", res.user.current_streak);
            } else {
                println!("Already checked in (streak {})", res.user.current_streak);
            }
            for lv in &res.level_ups {
                println!("LEVEL UP! {} -> {}", lv.previous_level, lv.new_level);
            }
            print_unlocks(&res.achievements_unlocked);
        }

        QuestCommand::Status => {
            let me = engine.user_state(user)?;
            println!("User:    {}", me.user_id);
            println!(
                "Level:   {} ({}/{} XP, {} to go)",
                me.level,
                me.current_xp,
                XP_PER_LEVEL,
                me.xp_to_next_level()
            );
            println!("Total:   {} XP", me.total_xp);
            println!("Gold:    {}", me.gold);
            println!(
                "Streak:  {} day(s), x{:.1} (best {})",
                me.current_streak,
                multiplier_for(me.current_streak),
                me.longest_streak
            );
            println!("Quests:  {} completed", me.total_tasks_completed);
        }

        QuestCommand::Achievements => {
            for (a, p) in engine.achievements(user)? {
                let mark = if p.is_unlocked { "x" } else { " " };
                let shown = p.progress.min(a.requirement_value);
                println!(
                    "[{mark}] {:<16} {shown:>4}/{:<4} {:?} - {}",
                    a.name, a.requirement_value, a.rarity, a.description
                );
            }
        }
    }

    Ok(())
}

fn parse_due(local: &str, cfg: &Config) -> Result<DateTime<Utc>> {
    time::parse_local_due_to_utc(local, &cfg.user.timezone)
        .with_context(|| format!("--due {local}"))
}

/// Accept a full id or any unique prefix of one of the user's quests.
fn resolve_id(engine: &Engine, user: &str, prefix: &str) -> Result<String> {
    let matches: Vec<String> = engine
        .list_tasks(user)?
        .into_iter()
        .filter(|t| t.id.starts_with(prefix))
        .map(|t| t.id)
        .collect();
    match matches.as_slice() {
        [one] => Ok(one.clone()),
        [] => Ok(prefix.to_string()),
        _ => bail!("id prefix '{prefix}' matches {} quests; use more characters", matches.len()),
    }
}

fn short(t: &Task) -> String {
    format!("{} \"{}\" [{}]", &t.id[..t.id.len().min(8)], t.title, t.status)
}

fn print_task_line(t: &Task, cfg: &Config) {
    let due = t
        .due_date
        .map(|d| match cfg.timezone() {
            Ok(tz) => d.with_timezone(&tz).format("%Y-%m-%d %H:%M").to_string(),
            Err(_) => d.to_rfc3339(),
        })
        .unwrap_or_else(|| "-".to_string());
    let indent = if t.is_subtask() { "  └ " } else { "" };
    println!(
        "{indent}{} {:?} p{} d{} due {} | {} XP / {} gold",
        short(t),
        t.category,
        t.priority.value(),
        t.difficulty.value(),
        due,
        t.xp_reward,
        t.gold_reward
    );
}

fn print_completion(res: &CompletionResult) {
    println!("Quest complete: {}", res.task.title);
    if res.bonus_xp > 0 {
        println!(
            "+{} XP ({} base +{} streak bonus x{:.1}), +{} gold",
            res.xp_gained, res.base_xp, res.bonus_xp, res.multiplier, res.gold_gained
        );
    } else {
        println!("+{} XP, +{} gold", res.xp_gained, res.gold_gained);
    }
    for lv in &res.level_ups {
        println!("LEVEL UP! {} -> {}", lv.previous_level, lv.new_level);
    }
    print_unlocks(&res.achievements_unlocked);
    if let Some(next) = &res.next_occurrence {
        println!("Next occurrence: {}", short(next));
    }
    println!(
        "Level {} ({}/{} XP), {} gold",
        res.user.level,
        res.user.current_xp,
        XP_PER_LEVEL,
        res.user.gold
    );
}

fn print_unlocks(unlocked: &[UnlockedAchievement]) {
    for a in unlocked {
        let name = &a.achievement.name;
        let rarity = a.achievement.rarity;
        if a.reward.is_zero() {
            println!("Achievement unlocked: {name} ({rarity:?})");
        } else {
            println!(
                "Achievement unlocked: {name} ({rarity:?}) +{} XP, +{} gold",
                a.reward.xp, a.reward.gold
            );
        }
    }
}
