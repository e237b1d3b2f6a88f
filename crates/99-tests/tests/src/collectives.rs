use rkyv::{Archive, Deserialize, Serialize};
use runtime_native::NativeCluster;

#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
struct Basis {
    label: String,
    exponents: Vec<f64>,
}

#[test]
fn broadcast_from_every_root_is_identical_everywhere() {
    const SIZE: usize = 5;
    let seen = NativeCluster::new(SIZE)
        .run(|mut ctx| {
            let world = ctx.world();
            (0..world.size())
                .map(|root| world.gop().broadcast(world.rank() as u64 * 100, root))
                .collect::<Vec<_>>()
        })
        .expect("run");

    let expected: Vec<u64> = (0..SIZE as u64).map(|root| root * 100).collect();
    assert!(seen.iter().all(|values| *values == expected), "{seen:?}");
}

#[test]
fn broadcast_carries_structured_values() {
    let seen = NativeCluster::new(3)
        .run(|mut ctx| {
            let world = ctx.world();
            let mine = Basis {
                label: format!("rank-{}", world.rank()),
                exponents: vec![world.rank() as f64; 3],
            };
            world.gop().broadcast(mine, 2)
        })
        .expect("run");
    let expected = Basis {
        label: "rank-2".to_owned(),
        exponents: vec![2.0; 3],
    };
    assert!(seen.iter().all(|basis| *basis == expected));
}

#[test]
fn reductions_agree_on_every_rank() {
    const SIZE: usize = 6;
    let results = NativeCluster::new(SIZE)
        .run(|mut ctx| {
            let world = ctx.world();
            let rank = world.rank() as i64;
            let gop = world.gop();
            (
                gop.sum(rank),
                gop.max(rank * 3),
                gop.min(10 - rank),
                gop.max(rank as f64 * 0.5),
                gop.reduce(vec![rank, 1], |a, b| {
                    a.iter().zip(&b).map(|(x, y)| x + y).collect()
                }),
            )
        })
        .expect("run");

    for (sum, max, min, fmax, elementwise) in &results {
        assert_eq!(*sum, 15);
        assert_eq!(*max, 15);
        assert_eq!(*min, 5);
        assert_eq!(*fmax, 2.5);
        assert_eq!(elementwise, &vec![15, 6]);
    }
}

#[test]
fn barrier_orders_a_shared_observation() {
    let results = NativeCluster::new(4)
        .run(|mut ctx| {
            let world = ctx.world();
            for _ in 0..25 {
                world.gop().barrier();
            }
            world.gop().sum(1u32)
        })
        .expect("run");
    assert_eq!(results, vec![4; 4]);
}

#[test]
fn mismatched_collectives_abort_the_group() {
    let err = NativeCluster::new(2)
        .run(|mut ctx| {
            let world = ctx.world();
            if world.rank() == 0 {
                world.gop().broadcast(7u8, 0);
            }
            world.gop().barrier();
        })
        .expect_err("collective sequences diverge");
    assert!(format!("{err:#}").contains("collective mismatch"), "{err:#}");
}
