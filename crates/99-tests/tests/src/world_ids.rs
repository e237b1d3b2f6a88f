use std::collections::HashSet;

use runtime_native::NativeCluster;
use world::RuntimeConfig;

#[test]
fn overlapping_worlds_get_distinct_ids() {
    let mut cluster = NativeCluster::new(4);
    let odd = cluster.add_group(&[1, 3]);
    let mixed = cluster.add_group(&[2, 0]);

    let ids = cluster
        .run(move |mut ctx| {
            let all = ctx.world();
            let sub = ctx.join(odd).or_else(|| ctx.join(mixed)).expect("every rank is in one subgroup");
            // Both stay alive so their ids are concurrently in use.
            let ids = (all.id(), sub.id(), sub.rank(), sub.size());
            all.fence();
            sub.fence();
            ids
        })
        .expect("run");

    // Ids come from the drawing rank's private range: universe rank 0 draws
    // for the full world, 1 for [1, 3], 2 for [2, 0].
    assert_eq!(ids[0], (0, 20_000, 1, 2));
    assert_eq!(ids[1], (0, 10_000, 0, 2));
    assert_eq!(ids[2], (0, 20_000, 0, 2));
    assert_eq!(ids[3], (0, 10_000, 1, 2));
}

#[test]
fn successive_worlds_on_one_group_never_reuse_an_id() {
    let mut cluster = NativeCluster::new(3);
    let groups: Vec<usize> = (0..4).map(|_| cluster.add_group(&[0, 1, 2])).collect();

    let ids = cluster
        .run(move |mut ctx| {
            let mut ids = Vec::new();
            for group in &groups {
                let world = ctx.join(*group).expect("member");
                ids.push(world.id());
                // Dropped here; the next world must still get a fresh id.
            }
            ids
        })
        .expect("run");

    assert!(ids.iter().all(|per_rank| *per_rank == ids[0]));
    let distinct: HashSet<u64> = ids[0].iter().copied().collect();
    assert_eq!(distinct.len(), ids[0].len());
}

#[test]
fn exhausted_id_range_aborts() {
    let mut cluster =
        NativeCluster::new(2).with_config(RuntimeConfig::default().with_ids_per_process(1));
    let second = cluster.add_group(&[0, 1]);

    let err = cluster
        .run(move |mut ctx| {
            let _first = ctx.world();
            ctx.join(second).map(|world| world.id())
        })
        .expect_err("rank 0 has only one id");
    assert!(format!("{err:#}").contains("ran out of world ids"), "{err:#}");
}

#[test]
fn worlds_are_found_only_where_they_exist() {
    let mut cluster = NativeCluster::new(3);
    let pair = cluster.add_group(&[0, 2]);

    let found = cluster
        .run(move |mut ctx| {
            let all = ctx.world();
            let sub = ctx.join(pair);
            // Everyone learns the pair's id from rank 0.
            let pair_id = all.gop().broadcast(sub.as_ref().map_or(u64::MAX, |w| w.id()), 0);
            let found = ctx.runtime().find_world(pair_id).is_some();
            all.fence();
            found
        })
        .expect("run");
    assert_eq!(found, vec![true, false, true]);
}

#[test]
fn peer_failing_before_creation_releases_the_others() {
    let err = NativeCluster::new(3)
        .run(|mut ctx| {
            if ctx.rank() == 2 {
                panic!("rank 2 never joined");
            }
            // Ranks 0 and 1 block in the creation collectives until they see
            // the abort.
            ctx.world().id()
        })
        .expect_err("rank 2 panicked");
    let report = format!("{err:#}");
    assert!(report.contains("rank 2 panicked"), "{report}");
    assert!(report.contains("rank 2 never joined"), "{report}");
}
