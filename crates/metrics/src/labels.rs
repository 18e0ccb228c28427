use std::borrow::Cow;

/// A single `key="value"` pair attached to a metric observation. Values may
/// be owned or `'static`; keys always come from the metric declaration.
#[derive(PartialOrd, Ord, PartialEq, Eq, Clone, Debug)]
pub struct MetricLabel {
    pub key: &'static str,
    pub value: Cow<'static, str>,
}

impl MetricLabel {
    pub const STATUS_ERROR: MetricLabel = MetricLabel::new_const("status", "error");
    pub const STATUS_SUCCESS: MetricLabel = MetricLabel::new_const("status", "success");

    pub fn new(key: &'static str, value: impl Into<Cow<'static, str>>) -> Self {
        Self {
            key,
            value: value.into(),
        }
    }

    pub const fn new_const(key: &'static str, value: &'static str) -> MetricLabel {
        MetricLabel {
            key,
            value: Cow::Borrowed(value),
        }
    }

    /// Common label. Use this instead of custom defined ones when possible.
    pub fn status(is_ok: bool) -> MetricLabel {
        if is_ok {
            Self::STATUS_SUCCESS
        } else {
            Self::STATUS_ERROR
        }
    }

    pub fn split_key_value(&self) -> (&str, &str) {
        (self.key, &self.value)
    }
}

pub const STATUS_LABEL: [&str; 1] = ["status"];

pub trait IntoLabel {
    fn as_label(&self) -> &'static str;
}

impl IntoLabel for bool {
    fn as_label(&self) -> &'static str {
        if *self {
            "true"
        } else {
            "false"
        }
    }
}
