//! A rating engine assembled with a small builder DSL.
//!
//! A [`Job`] is split into [`SubJob`]s, each sub-job goes through its own
//! processors, and the rated sub-jobs are merged back into the job before the
//! job's own post-processors run.
//!
//! ```bash
//! cargo run -p stackpipe --example rating_engine
//! ```

use stackpipe::{
    Children, Dispatch, Emitter, Error, PoolOptions, PoolProcess, PoolStack, Process, Result,
    Split, from_iter, lift_all, link, merge_fn, process_fn, run, split_fn, wrap,
};

#[derive(Clone, Debug)]
struct Job {
    id: u32,
    lines: Vec<u64>,
    total: u64,
}

#[derive(Clone, Debug)]
struct SubJob {
    job: u32,
    amount: u64,
}

fn short_name<T>() -> &'static str {
    let name = core::any::type_name::<T>();
    name.rsplit("::").next().unwrap_or(name)
}

/// A processor that only reports that it ran.
fn trace<T: 'static>() -> Process<T> {
    process_fn(|t: T| {
        print!(">{}>", short_name::<T>());
        t
    })
}

struct Engine {
    stack: PoolStack,
    process: PoolProcess<Job>,
}

impl Engine {
    fn builder() -> EngineBuilder {
        EngineBuilder::default()
    }

    async fn run(self, jobs: Vec<Job>) -> Result<()> {
        let result = run(&self.stack, from_iter(jobs), self.process).await;
        self.stack.release().await?;
        result
    }
}

#[derive(Default)]
struct EngineBuilder {
    pool_sizes: Option<Vec<usize>>,
    pool_options: PoolOptions,
    pre: Vec<Process<Job>>,
    dispatched: Option<PoolProcess<Job>>,
    post: Vec<Process<Job>>,
}

impl EngineBuilder {
    fn pool_sizes(mut self, sizes: &[usize]) -> Self {
        self.pool_sizes = Some(sizes.to_vec());
        self
    }

    fn pool_options(mut self, options: PoolOptions) -> Self {
        self.pool_options = options;
        self
    }

    /// Adds a job processor, before the split if none was declared yet,
    /// after the merge otherwise.
    fn processor(mut self, process: Process<Job>) -> Self {
        if self.dispatched.is_none() {
            self.pre.push(process);
        } else {
            self.post.push(process);
        }
        self
    }

    fn split<F, Fut>(self, f: F) -> SubJobBuilder
    where
        F: Fn(Job, Emitter<SubJob>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        SubJobBuilder {
            parent: self,
            split: split_fn(f),
            processors: Vec::new(),
        }
    }

    fn build(self) -> Result<Engine> {
        let Some(dispatched) = self.dispatched else {
            return Err(Error::InvalidDispatch {
                parent: short_name::<Job>(),
                child: short_name::<SubJob>(),
                missing: "split",
            });
        };

        let pool_sizes = self.pool_sizes.unwrap_or_else(|| vec![0, 2]);
        let stack = PoolStack::new(&pool_sizes, self.pool_options)?;

        let process = link([
            link(lift_all(self.pre)),
            dispatched,
            link(lift_all(self.post)),
        ]);
        Ok(Engine { stack, process })
    }
}

struct SubJobBuilder {
    parent: EngineBuilder,
    split: Split<Job, SubJob>,
    processors: Vec<Process<SubJob>>,
}

impl SubJobBuilder {
    fn processor(mut self, process: Process<SubJob>) -> Self {
        self.processors.push(process);
        self
    }

    fn merge<F, Fut>(self, f: F) -> Result<EngineBuilder>
    where
        F: Fn(Job, Children<SubJob>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Job> + Send + 'static,
    {
        let Self {
            mut parent,
            split,
            processors,
        } = self;

        let dispatch = Dispatch::new(Some(split), Some(merge_fn(f)))?;
        parent.dispatched = Some(wrap(link(lift_all(processors)), dispatch));
        Ok(parent)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let surcharge = 5_u64;

    let engine = Engine::builder()
        // A pass-through first level keeps jobs, and thus output lines, in
        // order.
        .pool_sizes(&[0, 2])
        .pool_options(PoolOptions::new().max_blocking_tasks(64))
        .processor(trace())
        .processor(process_fn(|mut job: Job| {
            job.lines.retain(|&amount| amount > 0);
            job
        }))
        .split(|job: Job, sub_jobs: Emitter<SubJob>| async move {
            print!("[{}/{}]", short_name::<Job>(), short_name::<SubJob>());
            for amount in job.lines {
                sub_jobs.emit(SubJob { job: job.id, amount }).await?;
            }
            Ok(())
        })
        .processor(trace())
        .processor(process_fn(move |mut sub: SubJob| {
            sub.amount += surcharge;
            sub
        }))
        .merge(|mut job: Job, mut sub_jobs: Children<SubJob>| async move {
            while let Some(sub) = sub_jobs.recv().await {
                debug_assert_eq!(sub.job, job.id);
                job.total += sub.amount;
            }
            print!("[{}\\{}]", short_name::<SubJob>(), short_name::<Job>());
            job
        })?
        .processor(trace())
        .processor(process_fn(|job: Job| {
            println!(" job {} rated {}", job.id, job.total);
            job
        }))
        .build()?;

    let jobs = vec![
        Job {
            id: 1,
            lines: vec![10],
            total: 0,
        },
        Job {
            id: 2,
            lines: vec![3, 0, 7],
            total: 0,
        },
    ];

    engine.run(jobs).await
}
