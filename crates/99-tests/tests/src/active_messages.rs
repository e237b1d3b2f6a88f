use std::cell::RefCell;
use std::rc::Rc;

use runtime_native::NativeCluster;
use transport::Rank;
use world::{AmMessage, RuntimeConfig, World};

const BURST: u32 = 150;

#[test]
fn messages_between_a_pair_arrive_in_send_order() {
    let logs = NativeCluster::new(3)
        .with_config(RuntimeConfig::default().with_max_drain_per_poll(4))
        .run(|mut ctx| {
            let world = ctx.world();
            let log: Rc<RefCell<Vec<(Rank, u32)>>> = Rc::default();
            let sink = Rc::clone(&log);
            let handler = world.am().register(move |_, msg| {
                let seq = msg.decode::<u32>().expect("sequence number");
                sink.borrow_mut().push((msg.source, seq));
            });

            if world.rank() != 2 {
                for seq in 0..BURST {
                    world.am().send_value(2, handler, &seq);
                }
            }
            world.fence();
            let seen = log.borrow().clone();
            seen
        })
        .expect("run");

    assert!(logs[0].is_empty());
    assert!(logs[1].is_empty());
    for source in [0, 1] {
        let from_source: Vec<u32> = logs[2]
            .iter()
            .filter(|(src, _)| *src == source)
            .map(|(_, seq)| *seq)
            .collect();
        assert_eq!(from_source, (0..BURST).collect::<Vec<_>>(), "source {source}");
    }
}

#[test]
fn raw_payloads_reach_the_handler_untouched() {
    let payloads = NativeCluster::new(2)
        .run(|mut ctx| {
            let world = ctx.world();
            let seen: Rc<RefCell<Vec<Vec<u8>>>> = Rc::default();
            let sink = Rc::clone(&seen);
            let handler = world
                .am()
                .register(move |_, msg| sink.borrow_mut().push(msg.payload.to_vec()));
            let peer = 1 - world.rank();
            let request = world.am().send(peer, handler, vec![world.rank() as u8; 5]);
            world.runtime().await_request(&request);
            world.fence();
            let collected = seen.borrow().clone();
            collected
        })
        .expect("run");
    assert_eq!(payloads, vec![vec![vec![1u8; 5]], vec![vec![0u8; 5]]]);
}

#[test]
fn handlers_are_addressed_by_registration_order() {
    let tallies = NativeCluster::new(2)
        .run(|mut ctx| {
            let world = ctx.world();
            let hits: Rc<RefCell<[u32; 2]>> = Rc::default();
            let first = Rc::clone(&hits);
            let second = Rc::clone(&hits);
            let add = world.am().register(move |_, _| first.borrow_mut()[0] += 1);
            let mark = world.am().register(move |_, _| second.borrow_mut()[1] += 10);
            assert_eq!((add.index(), mark.index()), (0, 1));

            if world.rank() == 0 {
                world.am().send(1, mark, Vec::new());
                world.am().send(1, add, Vec::new());
                world.am().send(1, add, Vec::new());
            }
            world.fence();
            let tally = *hits.borrow();
            tally
        })
        .expect("run");
    assert_eq!(tallies, vec![[0, 0], [2, 10]]);
}

#[test]
fn sending_to_a_missing_rank_aborts() {
    let err = NativeCluster::new(2)
        .run(|mut ctx| {
            let world = ctx.world();
            let handler = world.am().register(|_, _| {});
            if world.rank() == 0 {
                world.am().send(5, handler, Vec::new());
            }
            world.fence();
        })
        .expect_err("rank 5 does not exist");
    assert!(
        format!("{err:#}").contains("active message to rank 5"),
        "{err:#}"
    );
}

#[test]
fn handler_registered_after_a_barrier_still_receives() {
    let received = NativeCluster::new(2)
        .run(|mut ctx| {
            let world = ctx.world();
            let seen: Rc<RefCell<Vec<u32>>> = Rc::default();
            let sink = Rc::clone(&seen);
            let record = move |_: &World, msg: AmMessage<'_>| {
                sink.borrow_mut().push(msg.decode::<u32>().expect("value"));
            };

            if world.rank() == 0 {
                let handler = world.am().register(record);
                world.am().send_value(1, handler, &99u32);
                world.gop().barrier();
            } else {
                // The message can land while rank 1 waits in the barrier.
                world.gop().barrier();
                world.am().register(record);
            }
            world.fence();
            let values = seen.borrow().clone();
            (values, world.stats().am_parked)
        })
        .expect("run");
    assert_eq!(received, vec![(vec![], 0), (vec![99], 0)]);
}

#[test]
fn messages_for_a_never_registered_handler_abort_the_fence() {
    let err = NativeCluster::new(2)
        .run(|mut ctx| {
            let world = ctx.world();
            world.am().register(|_, _| {});
            if world.rank() == 0 {
                let extra = world.am().register(|_, _| {});
                world.am().send(1, extra, Vec::new());
            }
            world.fence();
        })
        .expect_err("rank 1 has no second handler");
    assert!(format!("{err:#}").contains("never registered"), "{err:#}");
}
