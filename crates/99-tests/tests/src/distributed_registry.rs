use std::cell::RefCell;
use std::rc::Rc;

use runtime_native::NativeCluster;
use transport::Rank;
use world::{RuntimeConfig, UniqueId, WorldRef};

/// Per-rank mailbox standing in for one piece of a distributed container.
#[derive(Default)]
struct Shard {
    deliveries: RefCell<Vec<(Rank, u64)>>,
}

#[test]
fn ids_allocated_in_step_name_the_same_object_everywhere() {
    let results = NativeCluster::new(3)
        .run(|mut ctx| {
            let world = ctx.world();
            let shards: Vec<Rc<Shard>> = (0..4).map(|_| Rc::new(Shard::default())).collect();
            let ids: Vec<UniqueId> = shards.iter().map(|shard| world.register(shard)).collect();

            let deliver = world.am().register(|world, msg| {
                let (id, value) = msg.decode::<(UniqueId, u64)>().expect("addressed payload");
                let Some(shard) = world.lookup_by_id::<Shard>(id) else {
                    world.fatal(format_args!("no local shard for {id}"));
                };
                shard.deliveries.borrow_mut().push((msg.source, value));
            });

            // Every rank addresses shard `rank` on its right-hand neighbour.
            let right = (world.rank() + 1) % world.size();
            let target = ids[world.rank()];
            world
                .am()
                .send_value(right, deliver, &(target, world.rank() as u64 * 7));
            world.fence();

            let received: Vec<Vec<(Rank, u64)>> = shards
                .iter()
                .map(|shard| shard.deliveries.borrow().clone())
                .collect();
            let obj_ids: Vec<u64> = ids.iter().map(UniqueId::obj_id).collect();
            (obj_ids, received)
        })
        .expect("run");

    for (rank, (obj_ids, received)) in results.iter().enumerate() {
        assert_eq!(obj_ids, &vec![1, 2, 3, 4]);
        let left = (rank + 2) % 3;
        for (slot, deliveries) in received.iter().enumerate() {
            if slot == left {
                assert_eq!(deliveries, &vec![(left, left as u64 * 7)]);
            } else {
                assert!(deliveries.is_empty(), "rank {rank} slot {slot}: {deliveries:?}");
            }
        }
    }
}

#[test]
fn world_references_resolve_on_members() {
    let resolved = NativeCluster::new(2)
        .run(|mut ctx| {
            let world = ctx.world();
            let hits = Rc::new(RefCell::new(Vec::new()));
            let sink = Rc::clone(&hits);
            let handler = world.am().register(move |world, msg| {
                let reference = msg.decode::<WorldRef>().expect("world ref");
                let target = world.resolve_ref(reference);
                sink.borrow_mut().push(target.id());
            });
            let peer = 1 - world.rank();
            world.am().send_value(peer, handler, &world.world_ref());
            world.fence();
            let seen = hits.borrow().clone();
            (world.id(), seen)
        })
        .expect("run");

    for (id, seen) in resolved {
        assert_eq!(seen, vec![id]);
    }
}

#[test]
fn reference_to_a_foreign_world_is_fatal() {
    let mut cluster = NativeCluster::new(3);
    let pair = cluster.add_group(&[0, 1]);

    let err = cluster
        .run(move |mut ctx| {
            let all = ctx.world();
            let handler = all.am().register(|world, msg| {
                let reference = msg.decode::<WorldRef>().expect("world ref");
                world.resolve_ref(reference);
            });
            if let Some(sub) = ctx.join(pair) {
                if sub.rank() == 0 {
                    all.am().send_value(2, handler, &sub.world_ref());
                }
            }
            all.fence();
        })
        .expect_err("rank 2 is not in the pair");
    assert!(format!("{err:#}").contains("is not active on universe rank 2"), "{err:#}");
}

#[test]
fn consistency_check_accepts_matching_allocation() {
    let config = RuntimeConfig::default().with_id_consistency_check(true);
    let fences = NativeCluster::new(3)
        .with_config(config)
        .run(|mut ctx| {
            let world = ctx.world();
            for _ in 0..5 {
                world.unique_obj_id();
            }
            world.am().register(|_, _| {});
            world.fence();
            world.stats().fences
        })
        .expect("run");
    assert_eq!(fences, vec![1; 3]);
}

#[test]
fn consistency_check_catches_divergent_allocation() {
    let config = RuntimeConfig::default().with_id_consistency_check(true);
    let err = NativeCluster::new(3)
        .with_config(config)
        .run(|mut ctx| {
            let world = ctx.world();
            world.unique_obj_id();
            if world.rank() == 1 {
                world.unique_obj_id();
            }
            world.fence();
        })
        .expect_err("rank 1 allocated an extra id");
    assert!(
        format!("{err:#}").contains("object id allocation diverged"),
        "{err:#}"
    );
}
