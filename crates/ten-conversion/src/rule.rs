use serde::{Deserialize, Serialize};
use std::sync::Arc;
use ten_message::{get_property, set_property, Msg, PropertyPath, PropertyValue, ResultConversion};

/// One per-property rewrite rule. Conversion mode is tagged exactly the way
/// the original's rule JSON spells it (`conversion_mode: "from_original" |
/// "fixed_value"`), so configuration files written against the C runtime's
/// shape parse unchanged here.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "conversion_mode", rename_all = "snake_case")]
pub enum Rule {
    FromOriginal {
        path: PropertyPath,
        original_path: PropertyPath,
    },
    FixedValue {
        path: PropertyPath,
        value: PropertyValue,
    },
}

impl Rule {
    fn apply(&self, original: &Msg, target: &mut Msg) {
        match self {
            Rule::FromOriginal { path, original_path } => {
                if let Some(value) = original.peek_property(original_path) {
                    let value = value.clone();
                    target.set_property(path, value);
                }
            }
            Rule::FixedValue { path, value } => {
                target.set_property(path, value.clone());
            }
        }
    }
}

/// A named table of property rewrite rules applied when a message crosses a
/// graph connection edge. `keep_original` controls whether properties not
/// named by any rule survive the rewrite (mirrors the original's
/// `keep_original` flag on `msg_conversion`).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MsgConversion {
    #[serde(default)]
    pub rules: Vec<Rule>,
    #[serde(default)]
    pub keep_original: bool,
}

impl MsgConversion {
    pub fn new(rules: Vec<Rule>, keep_original: bool) -> Self {
        Self { rules, keep_original }
    }

    /// Produces the rewritten message a downstream extension should
    /// actually receive, given the message as it arrived on this edge.
    pub fn convert(&self, original: &Msg) -> Msg {
        let mut target = if self.keep_original {
            original.clone()
        } else {
            let mut t = original.clone();
            t.properties.clear();
            t
        };
        for rule in &self.rules {
            rule.apply(original, &mut target);
        }
        target
    }
}

/// Adapts a `MsgConversion` rule table to the `ResultConversion` trait so it
/// can be attached to a `Path`'s `result_conversion` slot. The original
/// source pairs a forward `msg_conversion` with an independent
/// `result_conversion` under one `msg_and_result_conversion` JSON document;
/// this wrapper is that second half.
#[derive(Debug)]
pub struct PathResultConversion(pub MsgConversion);

impl ResultConversion for PathResultConversion {
    fn apply(&self, result: &Msg) -> Msg {
        self.0.convert(result)
    }
}

impl PathResultConversion {
    pub fn into_ref(self) -> Arc<dyn ResultConversion> {
        Arc::new(self)
    }
}

/// The full pairing stored on a graph connection: rules applied to the cmd
/// going forward, plus rules applied to the cmd_result coming back.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MsgAndResultConversion {
    #[serde(default)]
    pub msg_conversion: Option<MsgConversion>,
    #[serde(default)]
    pub result_conversion: Option<MsgConversion>,
}

impl MsgAndResultConversion {
    pub fn convert_msg(&self, original: &Msg) -> Msg {
        match &self.msg_conversion {
            Some(conv) => conv.convert(original),
            None => original.clone(),
        }
    }

    /// Symmetric rules apply on cmd-results by default: absent an explicit
    /// override, the cmd_result crossing this edge on the way back is
    /// rewritten by the same rule table used going forward. `cmd_id` is
    /// never touched by `MsgConversion::convert` (it only rewrites
    /// `properties`), so the one thing that must stay untouched — the
    /// converted result's cmd_id must still equal the original's — holds
    /// for free.
    pub fn result_conversion_ref(&self) -> Option<Arc<dyn ResultConversion>> {
        self.result_conversion
            .clone()
            .or_else(|| self.msg_conversion.clone())
            .map(|c| PathResultConversion(c).into_ref())
    }
}
