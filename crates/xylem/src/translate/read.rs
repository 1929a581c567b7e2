use super::{InTransform, TransformTranslator, TranslateError, TranslateErrorKind};
use crate::context::TranslationContext;
use crate::payload::ReadPayload;
use crate::pipeline::{IsBounded, Pipeline, TransformNode};
use crate::source::SourceRegistry;
use std::sync::Arc;

/// Translates bounded read transforms into source streams.
///
/// The read payload names a source by URN; the registry decodes it into a
/// `BoundedSource`, which is attached to the engine without watermarks and
/// with the source operator uid set to the transform's unique name.
#[derive(Debug, Clone, Default)]
pub struct BoundedReadTranslator {
    sources: Arc<SourceRegistry>,
}

impl BoundedReadTranslator {
    pub fn new(sources: Arc<SourceRegistry>) -> Self {
        Self { sources }
    }
}

impl TransformTranslator for BoundedReadTranslator {
    fn translate(
        &self,
        node: &TransformNode,
        pipeline: &Pipeline,
        context: &mut TranslationContext,
    ) -> Result<(), TranslateError> {
        let name = node.transform.unique_name.as_str();
        let output = super::single_output(node)?;

        let spec = node.transform.spec.as_ref().ok_or_else(|| {
            TranslateError::new(
                name,
                TranslateErrorKind::MalformedGraph("read transform has no spec".into()),
            )
        })?;
        let payload = ReadPayload::decode(&spec.payload).in_transform(name)?;
        if payload.is_bounded == IsBounded::Unbounded {
            return Err(TranslateError::new(
                name,
                TranslateErrorKind::SourceConstruction(
                    "unbounded reads cannot be translated as bounded sources".into(),
                ),
            ));
        }

        let source = self.sources.from_spec(&payload.source).in_transform(name)?;
        super::translate_source(node, output, pipeline, context, source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coder::urn as coder_urn;
    use crate::engine::ExecutionEnvironment;
    use crate::options::PipelineOptions;
    use crate::pipeline::{Coder, FunctionSpec, PCollection, Transform, WindowingStrategy};
    use crate::source::urn as source_urn;
    use crate::translate::urn;

    fn pipeline(payload: Vec<u8>) -> (Pipeline, TransformNode) {
        let mut pipeline = Pipeline::new();
        let c = &mut pipeline.components;
        c.coders.insert("c_int".into(), Coder::new(coder_urn::VARINT));
        c.coders
            .insert("c_global".into(), Coder::new(coder_urn::GLOBAL_WINDOW));
        c.windowing_strategies.insert(
            "ws".into(),
            WindowingStrategy {
                window_coder_id: "c_global".into(),
            },
        );
        c.pcollections.insert(
            "pc".into(),
            PCollection {
                unique_name: "pc".into(),
                coder_id: "c_int".into(),
                is_bounded: IsBounded::Bounded,
                windowing_strategy_id: "ws".into(),
            },
        );

        let transform = Transform::new("Read/Range")
            .spec(FunctionSpec::new(urn::READ, payload))
            .output("out", "pc");
        c.transforms.insert("read".into(), transform.clone());
        (pipeline, TransformNode::new("read", transform))
    }

    fn range_payload() -> Vec<u8> {
        ReadPayload::bounded(FunctionSpec::new(
            source_urn::RANGE,
            br#"{"start":0,"end":5}"#.to_vec(),
        ))
        .encode()
        .unwrap()
    }

    fn context() -> TranslationContext {
        TranslationContext::new(ExecutionEnvironment::new(2), PipelineOptions::new())
    }

    #[test]
    fn test_translates_range() {
        let (pipeline, node) = pipeline(range_payload());
        let mut context = context();

        BoundedReadTranslator::default()
            .translate(&node, &pipeline, &mut context)
            .unwrap();

        let result = context.execute("pc").unwrap();
        let values: Vec<i64> = result.envelopes.iter().filter_map(|e| e.value.as_i64()).collect();
        assert_eq!(values, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_garbage_payload() {
        let (pipeline, node) = pipeline(b"\xde\xad".to_vec());
        let mut context = context();

        let err = BoundedReadTranslator::default()
            .translate(&node, &pipeline, &mut context)
            .unwrap_err();
        assert_eq!(err.transform, "Read/Range");
        assert!(matches!(err.kind, TranslateErrorKind::PayloadDecode(_)));
        assert!(context.stream("pc").is_none());
    }

    #[test]
    fn test_unknown_source() {
        let payload = ReadPayload::bounded(FunctionSpec::new("acme:source:s3:v1", Vec::new()))
            .encode()
            .unwrap();
        let (pipeline, node) = pipeline(payload);
        let mut context = context();

        let err = BoundedReadTranslator::default()
            .translate(&node, &pipeline, &mut context)
            .unwrap_err();
        assert!(matches!(err.kind, TranslateErrorKind::SourceConstruction(_)));
        assert!(context.execution_environment().graph().is_empty());
    }

    #[test]
    fn test_unbounded_payload() {
        let mut payload = ReadPayload::bounded(FunctionSpec::new(source_urn::IMPULSE, Vec::new()));
        payload.is_bounded = IsBounded::Unbounded;
        let (pipeline, node) = pipeline(payload.encode().unwrap());
        let mut context = context();

        let err = BoundedReadTranslator::default()
            .translate(&node, &pipeline, &mut context)
            .unwrap_err();
        assert!(matches!(err.kind, TranslateErrorKind::SourceConstruction(_)));
    }

    #[test]
    fn test_invalid_source_description() {
        let payload = ReadPayload::bounded(FunctionSpec::new(
            source_urn::RANGE,
            br#"{"start":9,"end":1}"#.to_vec(),
        ))
        .encode()
        .unwrap();
        let (pipeline, node) = pipeline(payload);

        let err = BoundedReadTranslator::default()
            .translate(&node, &pipeline, &mut context())
            .unwrap_err();
        assert!(matches!(err.kind, TranslateErrorKind::SourceConstruction(_)));
    }

    #[test]
    fn test_output_collection_not_in_components() {
        let (mut pipeline, _) = pipeline(range_payload());
        let transform = Transform::new("Read/Range")
            .spec(FunctionSpec::new(urn::READ, range_payload()))
            .output("out", "pc_missing");
        pipeline
            .components
            .transforms
            .insert("read".into(), transform.clone());
        let node = TransformNode::new("read", transform);
        let mut context = context();

        let err = BoundedReadTranslator::default()
            .translate(&node, &pipeline, &mut context)
            .unwrap_err();
        assert!(matches!(err.kind, TranslateErrorKind::UnknownCollection(_)));
        assert!(context.stream("pc_missing").is_none());
    }
}
