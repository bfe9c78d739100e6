//! Compatibility shim for the embed widget's timers.
//!
//! The widget script polls and backs off with short `setTimeout` delays
//! while it waits for its own data. Under automation those delays only add
//! latency. [`TimerShim`] is installed before any document script and runs
//! short delays on the next tick. Longer delays are treated as deliberate
//! timeouts and kept. Handles stay valid for `clearTimeout`.
//!
//! This is tied to the current widget; drop it (`timer_shim = false`) if the
//! widget stops relying on short retry loops.

/// Delays at or below this many milliseconds are collapsed by default.
pub const DEFAULT_COLLAPSE_CEILING_MS: u32 = 1000;

const TEMPLATE: &str = r#"(function(){
    if (window.__postshotTimerShim) return;
    window.__postshotTimerShim = true;
    var ceiling = {{CEILING}};
    var schedule = window.setTimeout;
    window.setTimeout = function(handler, delay){
        var ms = Number(delay) || 0;
        var args = Array.prototype.slice.call(arguments, 2);
        return schedule.apply(window, [handler, ms <= ceiling ? 0 : ms].concat(args));
    };
})();"#;

/// The named init-script hook that normalises widget timers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerShim {
    collapse_ceiling_ms: u32,
}

impl Default for TimerShim {
    fn default() -> Self {
        Self::new(DEFAULT_COLLAPSE_CEILING_MS)
    }
}

impl TimerShim {
    pub fn new(collapse_ceiling_ms: u32) -> Self {
        Self {
            collapse_ceiling_ms,
        }
    }

    pub fn collapse_ceiling_ms(&self) -> u32 {
        self.collapse_ceiling_ms
    }

    /// Script to register with [`crate::Engine::add_init_script`].
    pub fn script(&self) -> String {
        TEMPLATE.replace("{{CEILING}}", &self.collapse_ceiling_ms.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn script_embeds_the_ceiling() {
        let script = TimerShim::new(250).script();
        assert!(script.contains("var ceiling = 250;"));
        assert!(!script.contains("{{CEILING}}"));
    }

    // Stub timer that records what the shim forwards and hands out
    // sequential handles, like a browser would.
    const RECORDING_TIMERS: &str = r#"
        var window = globalThis;
        var scheduled = [];
        var cleared = [];
        window.setTimeout = function(handler, delay) {
            scheduled.push({ delay: delay, args: Array.prototype.slice.call(arguments, 2) });
            return scheduled.length;
        };
        window.clearTimeout = function(handle) { cleared.push(handle); };
    "#;

    fn run_with_shim(shim: TimerShim, calls: &str) -> serde_json::Value {
        let source = format!(
            "{}\n{}\n{}\nJSON.stringify({{ scheduled: scheduled, cleared: cleared, handles: handles }});",
            RECORDING_TIMERS,
            shim.script(),
            calls
        );
        let mut ctx = boa_engine::Context::default();
        let value = ctx
            .eval(boa_engine::Source::from_bytes(source.as_bytes()))
            .unwrap();
        let json = value.as_string().unwrap().to_std_string_escaped();
        serde_json::from_str(&json).unwrap()
    }

    #[test]
    fn short_delays_collapse_and_long_ones_are_kept() {
        let out = run_with_shim(
            TimerShim::default(),
            r#"var handles = [
                setTimeout(function(){}, 500),
                setTimeout(function(){}, 1000),
                setTimeout(function(){}, 1001),
                setTimeout(function(){}),
                setTimeout(function(){}, "20"),
            ];"#,
        );
        let delays: Vec<_> = out["scheduled"]
            .as_array()
            .unwrap()
            .iter()
            .map(|s| s["delay"].as_f64().unwrap())
            .collect();
        assert_eq!(delays, vec![0.0, 0.0, 1001.0, 0.0, 0.0]);
    }

    #[test]
    fn extra_arguments_and_handles_pass_through() {
        let out = run_with_shim(
            TimerShim::new(100),
            r#"var a = setTimeout(function(){}, 50, "x", 2);
               var b = setTimeout(function(){}, 150);
               clearTimeout(a);
               var handles = [a, b];"#,
        );
        assert_eq!(out["scheduled"][0]["args"], serde_json::json!(["x", 2]));
        assert_eq!(out["scheduled"][1]["delay"], serde_json::json!(150));
        assert_eq!(out["handles"], serde_json::json!([1, 2]));
        assert_eq!(out["cleared"], serde_json::json!([1]));
    }

    #[test]
    fn installing_twice_wraps_once() {
        // A second install with a wider ceiling must not take effect
        let out = run_with_shim(
            TimerShim::new(10),
            &format!(
                "{}\nvar handles = [setTimeout(function(){{}}, 40)];",
                TimerShim::new(100).script()
            ),
        );
        assert_eq!(out["scheduled"].as_array().unwrap().len(), 1);
        assert_eq!(out["scheduled"][0]["delay"], serde_json::json!(40));
    }
}
