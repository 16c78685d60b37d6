use anyhow::Result;
use jiff::Timestamp;
use serde::Serialize;
use serde_json::json;
use tracing::info;
use tracing_subscriber::EnvFilter;

use actfeed::activity_stream::notice_queue::NoticeQueue;
use actfeed::{
    ActionId, ActivityStream, Config, EntityRef, FollowOptions, FollowScope, NewAction, Principal,
    UnfollowOptions,
};

mod flags {
    use std::path::PathBuf;

    xflags::xflags! {
        cmd actfeed {
            /// TOML configuration file; defaults apply without one.
            optional -c, --config path: PathBuf

            /// Follow an entity, e.g. `follow user:1 organization:2`.
            cmd follow {
                required user: String
                required entity: String
                optional --category category: String
                /// Also show actions naming the entity as target or object.
                optional --all-roles
                /// Do not record a follow action.
                optional --quiet
                /// RFC 3339 start of the follow; defaults to now.
                optional --since since: String
            }
            /// Remove follows; every category unless one is given.
            cmd unfollow {
                required user: String
                required entity: String
                optional --category category: String
                /// Record an unfollow action.
                optional --announce
            }
            /// Record an action.
            cmd record {
                required actor: String
                required verb: String
                optional --target target: String
                optional --object object: String
                optional --private
                /// Make the action batchable within this many minutes.
                optional --batch minutes: u32
                /// JSON payload.
                optional --data data: String
                optional --at timestamp: String
            }
            /// Print a page of a feed.
            cmd feed {
                required user: String
                optional --offset offset: usize
                optional --limit limit: usize
                /// The user's own actions instead of the following feed.
                optional --own
            }
            /// Print what is new since the last poll.
            cmd poll {
                required user: String
                /// Only print how many entries are new.
                optional --count
            }
            /// Reset the feed view of a user.
            cmd rebuild {
                required user: String
            }
            cmd share {
                required user: String
                required id: u64
            }
            cmd delete {
                required user: String
                required id: u64
                /// Entity the user may act for; repeatable.
                repeated --manages entity: String
            }
            /// Drain the notification outbox to stdout.
            cmd notices {
                optional --visibility-timeout seconds: u64
            }
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let flags = flags::Actfeed::from_env_or_exit();
    let config = match &flags.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    let stream = ActivityStream::open(&config)?;

    match flags.subcommand {
        flags::ActfeedCmd::Follow(cmd) => {
            let user: EntityRef = cmd.user.parse()?;
            let entity: EntityRef = cmd.entity.parse()?;
            let options = FollowOptions {
                scope: if cmd.all_roles {
                    FollowScope::AllRoles
                } else {
                    FollowScope::ActorOnly
                },
                category: cmd.category.unwrap_or_default(),
                send_action: !cmd.quiet,
                started: cmd.since.map(|s| s.parse::<Timestamp>()).transpose()?,
            };
            print_json(&stream.follow(&user, &entity, options)?)?;
        }
        flags::ActfeedCmd::Unfollow(cmd) => {
            let user: EntityRef = cmd.user.parse()?;
            let entity: EntityRef = cmd.entity.parse()?;
            let options = UnfollowOptions {
                category: cmd.category.unwrap_or_default(),
                send_action: cmd.announce,
            };
            let removed = stream.unfollow(&user, &entity, options)?;
            print_json(&json!({ "removed": removed }))?;
        }
        flags::ActfeedCmd::Record(cmd) => {
            let mut new = NewAction::new(cmd.actor.parse()?, cmd.verb);
            if let Some(target) = cmd.target {
                new = new.target(target.parse()?);
            }
            if let Some(object) = cmd.object {
                new = new.action_object(object.parse()?);
            }
            if cmd.private {
                new = new.private();
            }
            if let Some(minutes) = cmd.batch {
                new = new.batchable(minutes);
            }
            if let Some(data) = cmd.data {
                new = new.data(serde_json::from_str(&data)?);
            }
            if let Some(timestamp) = cmd.at {
                new = new.at(timestamp.parse()?);
            }
            print_json(&stream.record(new)?)?;
        }
        flags::ActfeedCmd::Feed(cmd) => {
            let user: EntityRef = cmd.user.parse()?;
            let offset = cmd.offset.unwrap_or(0);
            let limit = cmd.limit.unwrap_or(config.feed.page_size);
            let page = if cmd.own {
                stream.actor_page(&user, offset, limit)?
            } else {
                stream.page(&user, offset, limit)?
            };
            print_json(&page)?;
        }
        flags::ActfeedCmd::Poll(cmd) => {
            let user: EntityRef = cmd.user.parse()?;
            if cmd.count {
                print_json(&json!({ "count": stream.poll_new_count(&user)? }))?;
            } else {
                print_json(&stream.poll_new_items(&user)?)?;
            }
        }
        flags::ActfeedCmd::Rebuild(cmd) => {
            let user: EntityRef = cmd.user.parse()?;
            stream.rebuild(&user)?;
        }
        flags::ActfeedCmd::Share(cmd) => {
            let user: EntityRef = cmd.user.parse()?;
            print_json(&stream.share_action(&user, ActionId(cmd.id))?)?;
        }
        flags::ActfeedCmd::Delete(cmd) => {
            let principal = Principal {
                user: cmd.user.parse()?,
                manages: cmd
                    .manages
                    .iter()
                    .map(|entity| entity.parse())
                    .collect::<Result<_, _>>()?,
            };
            let deleted = stream.delete_action(&principal, ActionId(cmd.id))?;
            print_json(&json!({ "deleted": deleted }))?;
        }
        flags::ActfeedCmd::Notices(cmd) => {
            let queue = stream.notice_queue();
            let timeout = cmd.visibility_timeout.unwrap_or(30);
            let mut drained = 0;
            while let Some(delivery) = queue.receive(NoticeQueue::now(), timeout)? {
                print_json(&delivery.notice)?;
                if queue.ack(delivery.key, delivery.receipt_handle)? {
                    drained += 1;
                }
            }
            info!(target: "notice", drained, "drained notices");
        }
    }
    Ok(())
}
