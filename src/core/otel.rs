/// Span attribute names emitted when observability is enabled.
pub mod span_attributes {
    pub const HTTP_REQUEST_METHOD: &str = "http.request.method";
    pub const HTTP_REQUEST_BODY_SIZE: &str = "http.request.body.size";
    pub const HTTP_REQUEST_RESEND_COUNT: &str = "http.request.resend_count";
    pub const HTTP_RESPONSE_STATUS_CODE: &str = "http.response.status_code";
    pub const HTTP_RESPONSE_BODY_SIZE: &str = "http.response.body.size";
    pub const HTTP_RESPONSE_HEADER_CONTENT_TYPE: &str = "http.response.header.content_type";
    pub const NETWORK_PROTOCOL_NAME: &str = "network.protocol.name";
    pub const SERVER_ADDRESS: &str = "server.address";
    pub const URL_FULL: &str = "url.full";
    pub const URL_SCHEME: &str = "url.scheme";
}

#[cfg(feature = "otel")]
mod enabled {
    use opentelemetry::KeyValue;
    use opentelemetry::global;
    use opentelemetry::trace::{Span, SpanKind, Tracer};

    use crate::options::ObservabilityOptions;

    /// A client span opened against the tracer named by the request's
    /// observability options. Ends when dropped.
    #[derive(Default)]
    pub(crate) struct HandlerSpan {
        span: Option<global::BoxedSpan>,
    }

    pub(crate) fn start_span(
        observability: Option<&ObservabilityOptions>,
        name: &str,
    ) -> HandlerSpan {
        let Some(observability) = observability else {
            return HandlerSpan::default();
        };
        let tracer = global::tracer(observability.tracer_instrumentation_name.clone());
        let span = tracer
            .span_builder(name.to_owned())
            .with_kind(SpanKind::Client)
            .start(&tracer);
        HandlerSpan { span: Some(span) }
    }

    impl HandlerSpan {
        pub(crate) fn set_bool(&mut self, key: &'static str, value: bool) {
            if let Some(span) = &mut self.span {
                span.set_attribute(KeyValue::new(key, value));
            }
        }

        pub(crate) fn set_i64(&mut self, key: &'static str, value: i64) {
            if let Some(span) = &mut self.span {
                span.set_attribute(KeyValue::new(key, value));
            }
        }

        pub(crate) fn set_str(&mut self, key: &'static str, value: String) {
            if let Some(span) = &mut self.span {
                span.set_attribute(KeyValue::new(key, value));
            }
        }
    }
}

#[cfg(not(feature = "otel"))]
mod enabled {
    use crate::options::ObservabilityOptions;

    #[derive(Default)]
    pub(crate) struct HandlerSpan;

    pub(crate) fn start_span(
        _observability: Option<&ObservabilityOptions>,
        _name: &str,
    ) -> HandlerSpan {
        HandlerSpan
    }

    impl HandlerSpan {
        pub(crate) fn set_bool(&mut self, _key: &'static str, _value: bool) {}

        pub(crate) fn set_i64(&mut self, _key: &'static str, _value: i64) {}

        pub(crate) fn set_str(&mut self, _key: &'static str, _value: String) {}
    }
}

pub(crate) use enabled::{HandlerSpan, start_span};
