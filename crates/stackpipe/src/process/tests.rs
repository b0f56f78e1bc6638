use crate::{
    Children, Dispatch, Emitter, Error, PoolStack, Result, from_iter, lift, lift_all,
    lift_blocking, link, pool_fn, process_fn, run, run_all, transform, wrap,
};
use parking_lot::Mutex;
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use std::time::{Duration, Instant};
use tokio::sync::Barrier;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
struct Main {
    init: i64,
    result: i64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct Branch {
    value: i64,
}

fn main_to_branch(children_read: Option<usize>) -> Dispatch<Main, Branch> {
    Dispatch::builder()
        .split(|main: Main, children: Emitter<Branch>| async move {
            children.emit(Branch { value: main.init }).await?;
            children.emit(Branch { value: main.init + 1 }).await?;
            Ok(())
        })
        .merge(move |mut main: Main, mut children: Children<Branch>| async move {
            let mut read = 0;
            while children_read.is_none_or(|max| read < max) {
                let Some(branch) = children.recv().await else {
                    break;
                };
                main.result += branch.value;
                read += 1;
            }
            main
        })
        .build()
        .unwrap()
}

async fn collect_mains(stack: &PoolStack, inits: Vec<i64>) -> Result<Vec<Main>> {
    let wrapped = wrap(lift(|b: Branch| b), main_to_branch(None));
    let input = from_iter(inits.into_iter().map(|init| Main { init, result: 0 }));
    transform(stack, input, move |s, m| wrapped(s, m)).collect().await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn branch_results_fold_into_main() -> Result<()> {
    for capacities in [vec![], vec![1, 1], vec![4, 2], vec![0, 3]] {
        let stack = PoolStack::from_capacities(&capacities)?;

        let out = collect_mains(&stack, vec![10]).await?;
        assert_eq!(out, vec![Main { init: 10, result: 21 }]);

        stack.release().await?;
    }
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn every_parent_is_merged_once() -> Result<()> {
    let stack = PoolStack::from_capacities(&[3, 2])?;

    let mut out = collect_mains(&stack, (0..20).collect()).await?;
    out.sort_unstable_by_key(|m| m.init);

    let expected: Vec<_> = (0..20)
        .map(|init| Main {
            init,
            result: 2 * init + 1,
        })
        .collect();
    assert_eq!(out, expected);

    stack.release().await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn merge_reading_one_of_two_children_is_a_violation() {
    let stack = PoolStack::from_capacities(&[1, 1]).unwrap();
    let wrapped = wrap(lift(|b: Branch| b), main_to_branch(Some(1)));

    let err = run(&stack, from_iter([Main::default()]), wrapped)
        .await
        .unwrap_err();

    let Error::ProtocolViolation { parent, child } = &err else {
        panic!("unexpected error: {err:?}");
    };
    assert!(parent.ends_with("Main"));
    assert!(child.ends_with("Branch"));

    let message = err.to_string();
    assert!(message.contains("Main"));
    assert!(message.contains("Branch"));
    assert!(message.contains("leaked child task"));
    assert!(err.is_fatal());

    stack.release().await.unwrap();
}

/// Two children of one parent meet at a barrier. They only get there if the
/// depth below the parent runs them concurrently.
async fn children_meet(capacities: &[usize]) -> bool {
    let stack = PoolStack::from_capacities(capacities).unwrap();
    let barrier = Arc::new(Barrier::new(2));
    let timed_out = Arc::new(AtomicBool::new(false));

    let (b, flag) = (Arc::clone(&barrier), Arc::clone(&timed_out));
    let child = pool_fn(move |_, branch: Branch| {
        let (barrier, flag) = (Arc::clone(&b), Arc::clone(&flag));
        async move {
            if tokio::time::timeout(Duration::from_millis(50), barrier.wait())
                .await
                .is_err()
            {
                flag.store(true, Ordering::SeqCst);
            }
            Ok(branch)
        }
    });

    run(
        &stack,
        from_iter([Main::default()]),
        wrap(child, main_to_branch(None)),
    )
    .await
    .unwrap();
    stack.release().await.unwrap();

    !timed_out.load(Ordering::SeqCst)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn child_concurrency_follows_the_depth_below() {
    assert!(!children_meet(&[1, 1]).await);
    assert!(children_meet(&[1, 2]).await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn nested_wraps_descend_one_depth_each() -> Result<()> {
    // usize -> two halves -> each half into two quarters
    fn halves() -> Dispatch<usize, usize> {
        Dispatch::builder()
            .split(|n: usize, children: Emitter<usize>| async move {
                children.emit(n / 2).await?;
                children.emit(n - n / 2).await?;
                Ok(())
            })
            .merge(|_, children: Children<usize>| async move {
                children.collect().await.into_iter().sum()
            })
            .build()
            .unwrap()
    }

    let depths = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&depths);
    let leaf = pool_fn(move |stack: PoolStack, n: usize| {
        let seen = Arc::clone(&seen);
        async move {
            seen.lock().push(stack.depth());
            Ok(n * 10)
        }
    });
    let process = wrap(wrap(leaf, halves()), halves());

    let stack = PoolStack::from_capacities(&[2, 2, 4])?;
    let out = transform(&stack, from_iter([8_usize, 5]), move |s, n| process(s, n))
        .collect()
        .await?;

    let mut out = out;
    out.sort_unstable();
    assert_eq!(out, vec![50, 80]);

    let depths = depths.lock();
    assert_eq!(depths.len(), 8);
    assert!(depths.iter().all(|&d| d == 3));

    stack.release().await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn link_applies_stages_in_order() -> Result<()> {
    let chain = link([lift(|x: i64| x + 1), lift(|x: i64| x * 2), lift(|x: i64| x - 3)]);
    let out = transform(&PoolStack::empty(), from_iter([0_i64, 1, 5]), move |s, x| {
        chain(s, x)
    })
    .collect()
    .await?;
    assert_eq!(out, vec![-1, 1, 9]);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn empty_link_is_identity() -> Result<()> {
    let chain = link::<u8, _>([]);
    assert_eq!(chain(PoolStack::empty(), 7).await?, 7);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn link_stops_on_first_error() {
    let reached = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&reached);

    let chain = link([
        lift(|x: u8| x + 1),
        pool_fn(|_, _: u8| async {
            Err(Error::StreamClosed {
                context: "second stage".into(),
            })
        }),
        lift(move |x: u8| {
            flag.store(true, Ordering::SeqCst);
            x
        }),
    ]);

    let err = chain(PoolStack::empty(), 0).await.unwrap_err();
    assert_eq!(
        err,
        Error::StreamClosed {
            context: "second stage".into()
        }
    );
    assert!(!reached.load(Ordering::SeqCst));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn linked_stages_share_the_stack() -> Result<()> {
    let stack = PoolStack::from_capacities(&[1, 3])?;
    let probe = |expected: usize| {
        pool_fn(move |stack: PoolStack, x: u8| async move {
            assert_eq!(stack.depth(), 1);
            assert_eq!(stack.capacities(), vec![expected]);
            Ok(x)
        })
    };

    run_all(&stack, from_iter(0..4_u8), [probe(3), probe(3)]).await?;
    stack.release().await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn lifted_processes_ignore_the_stack() -> Result<()> {
    let steps = lift_all([process_fn(|s: String| s + "a"), process_fn(|s: String| s + "b")]);
    assert_eq!(steps.len(), 2);

    let chain = link(steps);
    for stack in [
        PoolStack::empty(),
        PoolStack::from_capacities(&[0, 0])?,
        PoolStack::from_capacities(&[2])?,
    ] {
        assert_eq!(chain(stack.clone(), String::from(">")).await?, ">ab");
        stack.release().await?;
    }
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn run_all_drains_every_item() -> Result<()> {
    let stack = PoolStack::from_capacities(&[4])?;
    let total = Arc::new(Mutex::new(0_u64));

    let sink = Arc::clone(&total);
    run_all(
        &stack,
        from_iter(1..=100_u64),
        [
            lift(|x: u64| x * 2),
            lift(move |x: u64| {
                *sink.lock() += x;
                x
            }),
        ],
    )
    .await?;

    assert_eq!(*total.lock(), 2 * 5050);
    stack.release().await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn panicking_child_aborts_the_run() {
    let stack = PoolStack::from_capacities(&[1, 2]).unwrap();
    let child = pool_fn(|_, branch: Branch| async move {
        assert!(branch.value != 11, "bad branch");
        Ok(branch)
    });

    let err = run(
        &stack,
        from_iter([Main { init: 10, result: 0 }]),
        wrap(child, main_to_branch(None)),
    )
    .await
    .unwrap_err();

    assert_eq!(
        err,
        Error::TaskPanicked {
            reason: "bad branch".into()
        }
    );
    assert!(err.is_fatal());
    stack.release().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn blocking_steps_use_the_whole_pool() -> Result<()> {
    let stack = PoolStack::from_capacities(&[8])?;
    let step = lift_blocking(|x: u32| {
        std::thread::sleep(Duration::from_millis(100));
        x + 1
    });

    let start = Instant::now();
    let mut out = transform(&stack, from_iter(0..8_u32), move |s, x| step(s, x))
        .collect()
        .await?;
    let elapsed = start.elapsed();

    out.sort_unstable();
    assert_eq!(out, (1..=8).collect::<Vec<_>>());
    // Two runtime workers would need 400ms for eight inline sleeps.
    assert!(elapsed < Duration::from_millis(300), "took {elapsed:?}");

    stack.release().await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn blocking_step_panic_is_reported() {
    let step = lift_blocking(|x: u32| {
        assert!(x != 3, "blocking three");
        x
    });

    let err = run(&PoolStack::empty(), from_iter(0..5_u32), step)
        .await
        .unwrap_err();
    assert_eq!(
        err,
        Error::TaskPanicked {
            reason: "blocking three".into()
        }
    );
}
