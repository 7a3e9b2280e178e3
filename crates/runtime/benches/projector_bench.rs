use common::Tag;
use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use event_store::{EventCriteria, InMemoryEventLog, Position};
use runtime::{
    AggregateDefinition, AggregateRuntime, Command, CommandPayload, CommandRegistry, Decision,
    DomainEvent, Projector, ValidationError,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Moved {
    piece: String,
    squares: u32,
}

impl DomainEvent for Moved {
    const EVENT_TYPE: &'static str = "Moved";

    fn tags(&self) -> Vec<Tag> {
        vec![Tag::new("Piece", &self.piece)]
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Move {
    piece: String,
}

impl CommandPayload for Move {
    const COMMAND_TYPE: &'static str = "Move";
    type Target = String;

    fn target(&self) -> String {
        self.piece.clone()
    }
}

fn pieces() -> AggregateDefinition<u64, String> {
    AggregateDefinition::new(
        "Piece",
        0,
        |piece: &String| EventCriteria::having_tag(Tag::new("Piece", piece.as_str())),
        Projector::new().on(|total, e: Moved| total + u64::from(e.squares)),
    )
}

fn bench_projector_fold(c: &mut Criterion) {
    let mut group = c.benchmark_group("runtime/project");
    let projector = Projector::new().on(|total: u64, e: Moved| total + u64::from(e.squares));

    for count in [10u64, 100, 1000] {
        let events: Vec<_> = (1..=count)
            .map(|n| {
                Moved {
                    piece: "p".into(),
                    squares: 1,
                }
                .to_new_event()
                .unwrap()
                .at(Position::new(n))
            })
            .collect();

        group.bench_with_input(BenchmarkId::from_parameter(count), &events, |b, events| {
            b.iter(|| projector.project(0, events).unwrap());
        });
    }
    group.finish();
}

fn bench_handle(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    let mut group = c.benchmark_group("runtime/handle");
    for every in [None, Some(50)] {
        let definition = match every {
            Some(n) => pieces().with_snapshots(n),
            None => pieces(),
        };
        let mut registry = CommandRegistry::new();
        registry
            .register(&definition, |cmd: Move, total: &u64| {
                Ok::<_, ValidationError>(Decision::new(*total + 1).emit(Moved {
                    piece: cmd.piece,
                    squares: 1,
                }))
            })
            .unwrap();
        let runtime = AggregateRuntime::new(InMemoryEventLog::new(), registry);
        let command = Command::from_payload(&Move { piece: "p".into() }).unwrap();

        let label = every.map_or("no_snapshots".to_string(), |n| format!("snapshot_every_{n}"));
        group.bench_function(label, |b| {
            b.iter(|| rt.block_on(runtime.handle(command.clone())).unwrap());
        });
    }
    group.finish();
}

criterion_group!(benches, bench_projector_fold, bench_handle);
criterion_main!(benches);
