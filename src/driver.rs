// Read-parallel front door.
//
// One read (or pair) per task; each rayon worker owns a `HiAligner` whose
// scratch survives across the tasks it processes. Worker metrics fold into
// the shared aggregator when the worker retires.

use crate::aligner::{AlignContext, HiAligner};
use crate::config::AlignOpts;
use crate::index::HierIndex;
use crate::metrics::MetricsAggregator;
use crate::read::Read;
use crate::reference::Reference;
use crate::scoring::Scoring;
use crate::sink::{AlnSink, ReadAlignments, ReportingParams};
use crate::splice_site::SpliceSiteDb;
use rayon::prelude::*;
use std::sync::Mutex;

/// One unit of alignment work.
pub enum ReadTask {
    Single(Read),
    Pair(Read, Read),
}

/// Consumer of finished per-read alignments. Called once per task, from
/// worker threads; implementations synchronize internally.
pub trait ReportSink: Sync {
    fn report_read(&self, task_index: usize, alignments: ReadAlignments);
}

/// Collects results in memory, for tests and small runs.
#[derive(Default)]
pub struct VecSink {
    results: Mutex<Vec<(usize, ReadAlignments)>>,
}

impl VecSink {
    pub fn new() -> Self {
        VecSink::default()
    }

    /// Results ordered by task index.
    pub fn into_results(self) -> Vec<(usize, ReadAlignments)> {
        let mut v = self.results.into_inner().unwrap();
        v.sort_by_key(|&(i, _)| i);
        v
    }
}

impl ReportSink for VecSink {
    fn report_read(&self, task_index: usize, alignments: ReadAlignments) {
        self.results.lock().unwrap().push((task_index, alignments));
    }
}

/// Align a batch of tasks across the rayon pool.
#[allow(clippy::too_many_arguments)]
pub fn align_reads<H: HierIndex, R: Reference, S: ReportSink>(
    scoring: &Scoring,
    opts: &AlignOpts,
    index: &H,
    reference: &R,
    ssdb: &SpliceSiteDb,
    params: ReportingParams,
    tasks: Vec<ReadTask>,
    sink: &S,
    metrics: &MetricsAggregator,
) {
    tasks
        .into_par_iter()
        .enumerate()
        .fold(
            || HiAligner::new(0x5eed_cafe),
            |mut worker, (i, task)| {
                let ctx = AlignContext {
                    scoring,
                    opts,
                    index,
                    reference,
                    ssdb,
                };
                let mut alnsink = AlnSink::new(params);
                match task {
                    ReadTask::Single(rd) => {
                        let minsc = opts.score_min.eval(rd.len());
                        let maxpen = opts.max_pen.eval(rd.len());
                        worker.init_read(rd, false, false, minsc, maxpen, false);
                    }
                    ReadTask::Pair(rd1, rd2) => {
                        let minsc = [
                            opts.score_min.eval(rd1.len()),
                            opts.score_min.eval(rd2.len()),
                        ];
                        let maxpen = [opts.max_pen.eval(rd1.len()), opts.max_pen.eval(rd2.len())];
                        worker.init_pair(rd1, rd2, [false; 2], [false; 2], minsc, maxpen);
                    }
                }
                worker.run(&ctx, &mut alnsink);
                sink.report_read(i, alnsink.into_alignments());
                worker
            },
        )
        .for_each(|worker| metrics.merge(worker.metrics()));
}
