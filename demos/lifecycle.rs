//! # Example: lifecycle
//!
//! Track a small fleet of services through a discovery flow.
//!
//! Demonstrates how to:
//! - Define a machine shape with TTLs, actions, and a flap detector.
//! - Run the fleet against a wall clock with a console logger.
//! - Drive instances with external signals and watch the TTL fill in the
//!   gaps for the ones nobody reports on.
//!
//! ## Flow
//! ```text
//! specified ──found──► up ◄──ping── down
//!     │                 │             │
//!   (ttl: create)     fault         (ttl: give_up)
//!     ▼                 ▼             ▼
//!  creating ──found──► up        decommissioned
//! ```
//!
//! ## Run
//! ```bash
//! cargo run --example lifecycle
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use fsmvisor::{
    define, ActionFn, Clock, ConsoleLogger, Flap, Index, Options, Signal, State,
};

const SPECIFIED: Index = Index(0);
const CREATING: Index = Index(1);
const UP: Index = Index(2);
const DOWN: Index = Index(3);
const DECOMMISSIONED: Index = Index(4);

const CREATE: Signal = Signal(0);
const FOUND: Signal = Signal(1);
const FAULT: Signal = Signal(2);
const PING: Signal = Signal(3);
const GIVE_UP: Signal = Signal(4);

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1) Declare the shape. Unreported instances age out of `specified`
    //    into provisioning; `down` gives up after 4 quiet ticks; an
    //    up/down oscillation decommissions the instance early.
    let provision = ActionFn::arc(|cx| {
        println!("provisioning instance {}", cx.id);
        Ok(())
    });

    let mut machines = define(vec![
        State::new(SPECIFIED)
            .on(FOUND, UP)
            .on(CREATE, CREATING)
            .action(CREATE, provision)
            .ttl(2, CREATE),
        State::new(CREATING).on(FOUND, UP),
        State::new(UP).on(FAULT, DOWN).on(GIVE_UP, DECOMMISSIONED),
        State::new(DOWN)
            .on(PING, UP)
            .on(GIVE_UP, DECOMMISSIONED)
            .ttl(4, GIVE_UP),
        State::new(DECOMMISSIONED),
    ])?;

    // 2) Configure diagnostics and the flap rule.
    let mut options = Options::defaults();
    options.logger = Some(Arc::new(ConsoleLogger));
    options.state_names = HashMap::from([
        (SPECIFIED, "specified".into()),
        (CREATING, "creating".into()),
        (UP, "up".into()),
        (DOWN, "down".into()),
        (DECOMMISSIONED, "decommissioned".into()),
    ]);
    options.signal_names = HashMap::from([
        (CREATE, "create".into()),
        (FOUND, "found".into()),
        (FAULT, "fault".into()),
        (PING, "ping".into()),
        (GIVE_UP, "give_up".into()),
    ]);
    options.limits = vec![Flap {
        states: [UP, DOWN],
        count: 2,
        raise: GIVE_UP,
    }];

    // 3) Run against a wall clock: one logical tick per 200ms.
    let clock = Clock::wall(Duration::from_millis(200));
    machines.run(&clock, options)?;

    // 4) Allocate a few instances.
    let reported = machines.new_fsm(SPECIFIED).await?;
    let silent = machines.new_fsm(SPECIFIED).await?;

    // One service is discovered immediately...
    reported.signal(FOUND).await?;

    // ...the other is left alone; after 2 ticks its TTL provisions it.
    tokio::time::sleep(Duration::from_millis(700)).await;
    println!(
        "reported={} silent={}",
        machines.state_name(reported.state().await),
        machines.state_name(silent.state().await),
    );

    // 5) Flap the reported service: two up/down round trips trip the
    //    detector and decommission it.
    for _ in 0..2 {
        reported.signal(FAULT).await?;
        reported.signal(PING).await?;
    }
    tokio::time::sleep(Duration::from_millis(300)).await;
    println!(
        "after flapping: reported={}",
        machines.state_name(reported.state().await),
    );

    machines.done();
    Ok(())
}
