use xylem::coder::urn as coder_urn;
use xylem::source::{TimestampedValue, urn as source_urn};
use xylem::translate::urn;
use xylem::{
    Coder, CoderSpec, Element, ExecutionEnvironment, FunctionSpec, PCollection, Pipeline,
    PipelineOptions, PipelineTranslator, ReadPayload, SourceRegistry, Timestamp, TransformNode,
    RangeSource, TransformTranslator, TranslateErrorKind, TranslationContext, Translator,
    ValuesSource, WatermarkStrategy, WindowingStrategy, Transform,
    attach_bounded_source, resolver,
};

/// Components with `pc_1` typed `kv<string_utf8, serde:json>` and `pc_bytes`
/// typed `bytes`, both in the global window.
fn pipeline_with(transforms: Vec<(&str, Transform)>) -> Pipeline {
    let mut pipeline = Pipeline::new();
    let c = &mut pipeline.components;
    c.coders.insert("c_str".into(), Coder::new(coder_urn::STRING_UTF8));
    c.coders
        .insert("c_json".into(), Coder::new(coder_urn::SERDE).payload("json"));
    c.coders.insert(
        "c_kv".into(),
        Coder::new(coder_urn::KV).component("c_str").component("c_json"),
    );
    c.coders.insert("c_bytes".into(), Coder::new(coder_urn::BYTES));
    c.coders
        .insert("c_global".into(), Coder::new(coder_urn::GLOBAL_WINDOW));
    c.windowing_strategies.insert(
        "ws_global".into(),
        WindowingStrategy {
            window_coder_id: "c_global".into(),
        },
    );
    for (id, coder) in [("pc_1", "c_kv"), ("pc_bytes", "c_bytes")] {
        c.pcollections.insert(
            id.into(),
            PCollection {
                unique_name: id.into(),
                coder_id: coder.into(),
                is_bounded: Default::default(),
                windowing_strategy_id: "ws_global".into(),
            },
        );
    }
    for (id, transform) in transforms {
        c.transforms.insert(id.into(), transform);
        pipeline.root_transform_ids.push(id.into());
    }
    pipeline
}

fn read_payload() -> Vec<u8> {
    let source = ValuesSource::new(vec![
        TimestampedValue {
            value: Element::kv("a", 1i64),
            timestamp: Timestamp(10),
        },
        TimestampedValue {
            value: Element::kv("b", "two"),
            timestamp: Timestamp(20),
        },
    ]);
    ReadPayload::bounded(FunctionSpec::new(source_urn::VALUES, source.encode().unwrap()))
        .encode()
        .unwrap()
}

fn read_transform() -> Transform {
    Transform::new("Read/Impulse")
        .spec(FunctionSpec::new(urn::READ, read_payload()))
        .output("out", "pc_1")
}

fn read_node() -> TransformNode {
    TransformNode::new("read", read_transform())
}

fn context(parallelism: usize, max_parallelism: usize, portable: bool) -> TranslationContext {
    TranslationContext::new(
        ExecutionEnvironment::new(parallelism).with_max_parallelism(max_parallelism),
        PipelineOptions::new().portable(portable),
    )
}

fn translate(node: &TransformNode, pipeline: &Pipeline, context: &mut TranslationContext) -> Result<(), xylem::TranslateError> {
    let sources = std::sync::Arc::new(SourceRegistry::with_builtins());
    let translator = Translator::for_urn(urn::READ, &sources).unwrap();
    translator.translate(node, pipeline, context)
}

#[test]
fn legacy_read_registers_native_type() {
    let pipeline = pipeline_with(vec![("read", read_transform())]);
    let mut context = context(4, 0, false);

    translate(&read_node(), &pipeline, &mut context).unwrap();

    let stream = context.stream("pc_1").unwrap();
    let native = context.type_info(&pipeline, "pc_1").unwrap();
    assert_eq!(stream.type_info(), &native);
    assert_eq!(context.streams().count(), 1);

    let graph = context.execution_environment().graph();
    assert_eq!(graph.len(), 1);
    let source = graph.node(stream.node_id()).unwrap();
    assert_eq!(source.parallelism, 4);
    assert_eq!(source.uid.as_deref(), Some("Read/Impulse"));
    assert_eq!(source.watermarks(), Some(WatermarkStrategy::NoWatermarks));

    let result = context.execute("pc_1").unwrap();
    assert_eq!(result.envelopes[0].value, Element::kv("a", 1i64));
    assert_eq!(result.envelopes[1].timestamp, Timestamp(20));
}

#[test]
fn portable_read_registers_wire_type_and_bridges() {
    let pipeline = pipeline_with(vec![("read", read_transform())]);
    let mut context = context(4, 0, true);

    translate(&read_node(), &pipeline, &mut context).unwrap();

    let stream = context.stream("pc_1").unwrap();
    let wire = resolver::wire_coder("pc_1", &pipeline.components).unwrap();
    let native = resolver::sdk_coder("pc_1", &pipeline.components).unwrap();
    assert_eq!(stream.type_info().coder(), &wire);
    assert_eq!(
        wire.value,
        CoderSpec::kv(CoderSpec::StringUtf8, CoderSpec::length_prefix(CoderSpec::Bytes))
    );

    let graph = context.execution_environment().graph();
    assert_eq!(graph.len(), 2);
    let bridge = graph.node(stream.node_id()).unwrap();
    assert_eq!(bridge.name, "Read/Impulse/into-wire");
    assert_eq!(bridge.uid, None);
    let source = graph.node(bridge.input().unwrap()).unwrap();
    assert_eq!(source.uid.as_deref(), Some("Read/Impulse"));
    assert_eq!(source.type_info.coder(), &native);

    let result = context.execute("pc_1").unwrap();
    assert_eq!(result.envelopes.len(), 2);
    for envelope in &result.envelopes {
        let Element::Kv(_, value) = &envelope.value else {
            panic!("expected kv, got {:?}", envelope.value);
        };
        assert!(value.as_bytes().is_some(), "value not in wire shape: {:?}", value);
    }
    assert_eq!(
        result.envelopes[0].value,
        Element::kv("a", Element::Bytes(br#"{"int":1}"#.to_vec()))
    );
    assert_eq!(result.envelopes[0].timestamp, Timestamp(10));
}

#[test]
fn bridged_records_decode_back_to_native() {
    let pipeline = pipeline_with(vec![("read", read_transform())]);
    let mut context = context(2, 0, true);
    translate(&read_node(), &pipeline, &mut context).unwrap();

    let wire = resolver::wire_coder("pc_1", &pipeline.components).unwrap();
    let native = resolver::sdk_coder("pc_1", &pipeline.components).unwrap();
    let result = context.execute("pc_1").unwrap();

    let back: Vec<Element> = result
        .envelopes
        .into_iter()
        .map(|e| xylem::from_wire_types(&wire, &native, e).unwrap().value)
        .collect();
    assert_eq!(back, vec![Element::kv("a", 1i64), Element::kv("b", "two")]);
}

#[test]
fn max_parallelism_wins_when_positive() {
    let pipeline = pipeline_with(vec![("read", read_transform())]);

    for (max, default, expected) in [(8, 4, 8), (0, 4, 4)] {
        let mut context = context(default, max, false);
        translate(&read_node(), &pipeline, &mut context).unwrap();

        let stream = context.stream("pc_1").unwrap();
        let node = context
            .execution_environment()
            .graph()
            .node(stream.node_id())
            .unwrap();
        assert_eq!(node.parallelism, expected, "max={} default={}", max, default);
    }
}

#[test]
fn wrong_output_arity_is_malformed() {
    let no_outputs = Transform::new("Read/Impulse").spec(FunctionSpec::new(urn::READ, read_payload()));
    let two_outputs = read_transform().output("extra", "pc_bytes");

    for transform in [no_outputs, two_outputs] {
        let pipeline = pipeline_with(vec![("read", transform.clone())]);
        let mut context = context(1, 0, false);

        let err = translate(&TransformNode::new("read", transform), &pipeline, &mut context)
            .unwrap_err();
        assert_eq!(err.transform, "Read/Impulse");
        assert!(matches!(err.kind, TranslateErrorKind::MalformedGraph(_)));
        assert_eq!(context.streams().count(), 0);
        assert!(context.execution_environment().graph().is_empty());
    }
}

#[test]
fn retranslation_yields_same_identity() {
    let pipeline = pipeline_with(vec![("read", read_transform())]);

    let uids = |portable: bool| {
        let mut context = context(2, 0, portable);
        translate(&read_node(), &pipeline, &mut context).unwrap();
        context
            .execution_environment()
            .graph()
            .nodes()
            .iter()
            .map(|n| n.uid.clone())
            .collect::<Vec<_>>()
    };

    assert_eq!(uids(false), uids(false));
    assert_eq!(uids(true), uids(true));
}

#[test]
fn second_registration_is_rejected() {
    let pipeline = pipeline_with(vec![("read", read_transform())]);
    let mut context = context(1, 0, false);

    translate(&read_node(), &pipeline, &mut context).unwrap();
    let first = context.stream("pc_1").cloned();
    let nodes = context.execution_environment().graph().len();

    let err = translate(&read_node(), &pipeline, &mut context).unwrap_err();
    assert!(matches!(err.kind, TranslateErrorKind::MalformedGraph(_)));
    assert_eq!(context.stream("pc_1").cloned(), first);
    assert_eq!(context.execution_environment().graph().len(), nodes);
}

#[test]
fn pipeline_translator_runs_all_leaves() {
    let mut composite = Transform::new("Read");
    composite.subtransforms.push("read".into());
    let impulse = Transform::new("Impulse")
        .spec(FunctionSpec::new(urn::IMPULSE, Vec::new()))
        .output("out", "pc_bytes");
    let mut pipeline = pipeline_with(vec![("impulse", impulse)]);
    pipeline
        .components
        .transforms
        .insert("composite".into(), composite);
    pipeline
        .components
        .transforms
        .insert("read".into(), read_transform());

    let mut context = context(2, 0, true);
    PipelineTranslator::default()
        .translate(&pipeline, &mut context)
        .unwrap();

    let ids: Vec<&str> = context.streams().map(|(id, _)| id).collect();
    assert_eq!(ids, vec!["pc_bytes", "pc_1"]);
    assert_eq!(context.execute("pc_bytes").unwrap().envelopes.len(), 1);
}

#[test]
fn pipeline_translator_is_all_or_nothing() {
    let bad = Transform::new("Broken")
        .spec(FunctionSpec::new(urn::READ, b"not a payload".to_vec()))
        .output("out", "pc_bytes");
    let pipeline = pipeline_with(vec![("read", read_transform()), ("broken", bad)]);
    let mut context = context(1, 0, false);

    let err = PipelineTranslator::default()
        .translate(&pipeline, &mut context)
        .unwrap_err();
    assert_eq!(err.transform, "Broken");
    assert!(matches!(err.kind, TranslateErrorKind::PayloadDecode(_)));
    assert_eq!(context.streams().count(), 0);
    assert!(context.execution_environment().graph().is_empty());
}

#[test]
fn unsupported_transform_is_reported() {
    let pardo = Transform::new("ParDo")
        .spec(FunctionSpec::new("xylem:transform:pardo:v1", Vec::new()))
        .input("in", "pc_1")
        .output("out", "pc_bytes");
    let pipeline = pipeline_with(vec![("read", read_transform()), ("pardo", pardo)]);
    let mut context = context(1, 0, false);

    let err = PipelineTranslator::default()
        .translate(&pipeline, &mut context)
        .unwrap_err();
    assert_eq!(err.transform, "ParDo");
    assert!(matches!(err.kind, TranslateErrorKind::UnsupportedTransform(_)));
    assert_eq!(context.streams().count(), 0);
}

#[test]
fn transform_named_like_bridge_translates_in_both_modes() {
    let impulse = Transform::new("Read/Impulse/into-wire")
        .spec(FunctionSpec::new(urn::IMPULSE, Vec::new()))
        .output("out", "pc_bytes");
    let pipeline = pipeline_with(vec![("impulse", impulse), ("read", read_transform())]);

    for portable in [false, true] {
        let mut context = context(2, 0, portable);
        PipelineTranslator::default()
            .translate(&pipeline, &mut context)
            .unwrap();

        let graph = context.execution_environment().graph();
        assert!(graph.find_by_uid("Read/Impulse/into-wire").is_some());
        assert!(graph.find_by_uid("Read/Impulse").is_some());
        assert_eq!(context.streams().count(), 2, "portable={}", portable);
    }
}

#[test]
fn failed_attach_leaves_graph_unchanged() {
    let pipeline = pipeline_with(vec![("read", read_transform())]);
    let mut context = context(1, 0, true);

    let type_info = context.type_info(&pipeline, "pc_bytes").unwrap();
    let options = context.pipeline_options().clone();
    attach_bounded_source(
        context.execution_environment_mut(),
        "Read/Impulse",
        std::sync::Arc::new(RangeSource::new(0, 3)),
        options,
        1,
        type_info,
    )
    .unwrap();

    let err = translate(&read_node(), &pipeline, &mut context).unwrap_err();
    assert_eq!(err.transform, "Read/Impulse");
    assert!(matches!(err.kind, TranslateErrorKind::SourceConstruction(_)));
    assert_eq!(context.execution_environment().graph().len(), 1);
    assert!(context.stream("pc_1").is_none());
}
