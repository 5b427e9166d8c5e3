//! Integration tests for contract-bmc
//!
//! Drives the public API end to end:
//! - translation (preprocess, parse, encode, emit, catalog)
//! - verification runs against fake backends (Unix only)

use contract_bmc::ast::CheckKind;
use contract_bmc::catalog::Behavior;
use contract_bmc::encode::{CProverPrimitives, Encoder};
use contract_bmc::verify::Translation;

const GCD: &str = "\
public class Gcd {
    /*@ requires a > 0 && b > 0;
      @ ensures \\result > 0;
      @*/
    @Verifyable
    public static int gcd(int a, int b) {
        while (b != 0) {
            int t = b;
            b = a % b;
            a = t;
        }
        return a;
    }
}
";

const BROKEN_GCD: &str = "\
public class Gcd {
    /*@ requires a > 0 && b > 0;
      @ ensures \\result > 0;
      @*/
    @Fails
    public static int gcd(int a, int b) {
        if (a == b) {
            return 0;
        }
        return a;
    }
}
";

fn translate(source: &str) -> Translation {
    Translation::new("Gcd.java", source).expect("translation failed")
}

/// 1-based line of the first emitted line containing `needle`
fn line_of(source: &str, needle: &str) -> usize {
    source
        .lines()
        .position(|l| l.contains(needle))
        .map(|i| i + 1)
        .unwrap_or_else(|| panic!("`{needle}` not emitted in:\n{source}"))
}

// ============================================
// Translation
// ============================================

#[test]
fn test_gcd_layout() {
    let t = translate(GCD);
    let src = &t.emitted.source;

    let assume = line_of(src, "org.cprover.CProver.assume(a > 0)");
    let assume_b = line_of(src, "org.cprover.CProver.assume(b > 0)");
    let ret = line_of(src, "__result = a;");
    let signal = line_of(src, "throw new __ReturnSignal();");
    let check = line_of(src, "assert __result > 0;");
    let exit = line_of(src, "return __result;");
    assert!(assume < assume_b && assume_b < ret && ret < signal && signal < check && check < exit);

    assert!(src.contains("Specification is not well defined for method gcd"));
    assert!(!src.contains("requires"));
    assert!(!src.contains("@Verifyable"));
    assert_eq!(t.targets[0].descriptor, "Gcd.gcd:(II)I");
    assert_eq!(t.targets[0].behavior, Behavior::Verify);
}

#[test]
fn test_gcd_metadata() {
    let t = translate(GCD);
    let meta = &t.emitted.metadata;
    let check = line_of(&t.emitted.source, "assert __result > 0;") as u32;

    let info = meta.assertion_at(check).expect("ensures assertion recorded");
    assert_eq!(info.kind, CheckKind::Ensures);
    assert_eq!(info.text, "\\result > 0");
    assert_eq!(info.original_line, Some(3));

    // `a = t;` keeps its source line
    let assign = line_of(&t.emitted.source, "a = t;") as u32;
    assert_eq!(meta.original_line(assign), Some(10));
    assert!(meta.is_user_assignment(assign, "a"));

    let method = meta.method_named("Gcd", "gcd").expect("method recorded");
    assert!(method.is_static);
    assert_eq!(method.params, vec!["a", "b"]);
}

#[test]
fn test_forall_requires_iterates_exactly_n_times() {
    let t = translate(
        "class Arr {\n\
         //@ requires \\forall int x; 0 <= x && x < n; a[x] > 0;\n\
         //@ ensures \\result >= 0;\n\
         static int first(int[] a, int n) { return a[0]; }\n\
         }\n",
    );
    let src = &t.emitted.source;
    let lp = line_of(src, "for (int __q0_x = 0; __q0_x < n; __q0_x++) {");
    let assume = line_of(src, "org.cprover.CProver.assume(__b0);");
    let check = line_of(src, "assert __result >= 0;");
    assert!(lp < assume && assume < check);
}

#[test]
fn test_old_snapshot_shared() {
    let t = translate(
        "class Counter {\n\
         int[] a;\n\
         //@ ensures a[0] == \\old(a[0]) + 1 && \\old(a[0]) >= 0;\n\
         void bump() { a[0] = a[0] + 1; }\n\
         }\n",
    );
    let src = &t.emitted.source;
    assert!(src.contains("int __old0 = 0;"));
    assert!(src.contains("__old0 = a[0];"));
    assert!(!src.contains("__old1"));
    // the snapshot is taken before the body mutates `a`
    assert!(line_of(src, "__old0 = a[0];") < line_of(src, "a[0] = a[0] + 1;"));
}

#[test]
fn test_reencoding_is_a_no_op() {
    let t = translate(GCD);
    let primitives = CProverPrimitives;
    let again = Encoder::new(&primitives).encode_program(&t.encoded.program);
    let emitted = contract_bmc::emit::emit(&again.program, &t.preprocessed);
    assert_eq!(emitted.source, t.emitted.source);
    assert!(again.methods.iter().all(|m| !m.had_contract && m.is_ok()));
}

#[test]
fn test_unsupported_construct_skips_only_that_method() {
    let t = translate(
        "class Mix {\n\
         //@ requires (\\sum int i; 0 <= i && i < n; i) > 0;\n\
         @Verifyable static void bad(int n) {}\n\
         //@ ensures \\result == x;\n\
         @Verifyable static int good(int x) { return x; }\n\
         }\n",
    );
    let failures: Vec<_> = t.encoded.failures().collect();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].method, "bad");
    assert!(t.emitted.source.contains("assert __result == x;"));
    assert!(t.emitted.source.contains("static void bad(int n) {"));
}

#[test]
fn test_old_of_collection_size() {
    let t = translate(
        "import java.util.ArrayList;\n\
         class Bag {\n\
         ArrayList<Integer> items;\n\
         //@ ensures items.size() == \\old(items.size()) + 1;\n\
         void add(int x) { items.add(x); }\n\
         }\n",
    );
    assert!(t.encoded.failures().next().is_none());
    let src = &t.emitted.source;
    assert!(src.contains("int __old0 = 0;"));
    assert!(src.contains("__old0 = items.size();"));
}

#[test]
fn test_empty_forall_range_keeps_later_postcondition_reachable() {
    let t = translate(
        "class Arr {\n\
         //@ ensures (\\forall int i; 0 <= i && i < n; a[i] > 0) && \\result > 5;\n\
         static int f(int[] a, int n) { return 0; }\n\
         }\n",
    );
    let src = &t.emitted.source;
    assert!(!src.contains("assume(0 <= __q0_i"));
    let guarded = line_of(src, "assert !(0 <= __q0_i && __q0_i < n) || a[__q0_i] > 0;");
    assert!(guarded < line_of(src, "assert __result > 5;"));
}

#[test]
fn test_guarded_forall_without_range() {
    let t = translate(
        "class Arr {\n\
         //@ requires (\\forall int i; 0 <= i && i < a.length ==> a[i] > 0);\n\
         //@ ensures \\result > 0;\n\
         static int first(int[] a) { return a[0]; }\n\
         }\n",
    );
    assert!(t.encoded.failures().next().is_none());
    assert!(t.emitted.source.contains("for (int __q0_i = 0; __q0_i < a.length; __q0_i++) {"));
}

// ============================================
// Verification against fake backends
// ============================================

#[cfg(unix)]
mod fake_backend {
    use std::path::Path;

    use contract_bmc::config::Settings;
    use contract_bmc::runner::BackendError;
    use contract_bmc::verify::staging::ArtifactBuilder;
    use contract_bmc::verify::{TargetStatus, Translation, Verifier};

    use super::{BROKEN_GCD, GCD, line_of, translate};

    /// Stages a shell script as the "artifact"; the backend is `/bin/sh`
    struct ScriptBuilder(String);

    impl ArtifactBuilder for ScriptBuilder {
        async fn build(&self, dir: &Path, source: &Path) -> Result<String, BackendError> {
            assert!(source.exists(), "translation was not staged");
            std::fs::write(dir.join("backend.sh"), &self.0)?;
            Ok("backend.sh".to_string())
        }
    }

    fn settings() -> Settings {
        Settings::default().with_backend("/bin/sh").with_timeout_ms(5_000)
    }

    async fn verify(t: &Translation, script: String, settings: Settings) -> contract_bmc::verify::VerificationReport {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("Gcd.java");
        Verifier::new(settings)
            .verify_with(&input, t, &t.targets, &ScriptBuilder(script))
            .await
            .expect("verification run failed")
    }

    fn json_script(json: &str) -> String {
        format!("cat <<'EOF'\n{json}\nEOF\nexit $STATUS\n")
    }

    #[tokio::test]
    async fn test_compliant_gcd_succeeds() {
        let t = translate(GCD);
        let json = r#"[{"program": "JBMC"},
            {"result": [{"property": "java::Gcd.gcd:(II)I.assertion.1", "description": "assertion", "status": "SUCCESS"}]},
            {"cProverStatus": "success"}]"#;
        let script = format!("STATUS=0\n{}", json_script(json));
        let report = verify(&t, script, settings().with_unwind(5)).await;

        let target = &report.targets[0];
        assert_eq!(target.status, TargetStatus::Success);
        assert_eq!(target.unwind, 5);
        assert!(target.matches_expectation());
        assert!(report.all_verified());
    }

    #[tokio::test]
    async fn test_broken_gcd_fails_with_result_trace() {
        let t = translate(BROKEN_GCD);
        let src = &t.emitted.source;
        let ret = line_of(src, "__result = 0;");
        let check = line_of(src, "assert __result > 0;");
        let json = format!(
            r#"[{{"result": [{{"property": "java::Gcd.gcd:(II)I.assertion.1", "description": "assertion",
                "status": "FAILURE", "trace": [
                {{"stepType": "assignment", "hidden": false, "lhs": "arg0i", "sourceLocation": {{"line": "6"}}, "value": {{"data": "3"}}}},
                {{"stepType": "assignment", "hidden": false, "lhs": "__result", "sourceLocation": {{"line": "{ret}"}}, "value": {{"data": "0"}}}},
                {{"stepType": "failure", "sourceLocation": {{"line": "{check}"}}}}
            ]}}]}}]"#
        );
        let script = format!("STATUS=10\n{}", json_script(&json));
        let report = verify(&t, script, settings()).await;

        let target = &report.targets[0];
        assert_eq!(target.status, TargetStatus::Failed);
        assert!(target.matches_expectation(), "@Fails target that failed matches");
        let trace = &target.traces[0];
        assert!(!trace.steps.is_empty());
        assert_eq!(trace.last_assignment(), Some("\\result"));
        assert_eq!(trace.condition.as_deref(), Some("\\result > 0"));
        assert_eq!(trace.original_line, Some(3));
    }

    #[tokio::test]
    async fn test_fault_in_precondition_is_ill_formed() {
        let t = Translation::new(
            "Gcd.java",
            "class Gcd {\n\
             //@ requires (\\forall int i; 0 <= i && i <= a.length; a[i] > 0);\n\
             //@ ensures \\result > 0;\n\
             @Verifyable static int first(int[] a) { return a[0]; }\n\
             }\n",
        )
        .unwrap();
        let fold = line_of(&t.emitted.source, "__b0 = __b0 &&");
        let json = format!(
            r#"[{{"result": [{{"property": "java::Gcd.first:([I)I.array-index-out-of-bounds-high.1",
                "description": "Array index should be < length", "status": "FAILURE",
                "trace": [{{"stepType": "failure", "sourceLocation": {{"line": "{fold}"}}}}]}}]}}]"#
        );
        let script = format!("STATUS=10\n{}", json_script(&json));
        let report = verify(&t, script, settings()).await;

        let target = &report.targets[0];
        assert_eq!(target.status, TargetStatus::Error);
        assert!(target.errors[0].starts_with("ill-formed requires clause near line 2"));
        assert!(!target.matches_expectation());
    }

    #[tokio::test]
    async fn test_malformed_output_is_error() {
        let t = translate(GCD);
        let report = verify(&t, "echo 'Segmentation fault'\nexit 139\n".into(), settings()).await;
        assert_eq!(report.targets[0].status, TargetStatus::Error);
        assert!(report.targets[0].traces.is_empty());
    }

    #[tokio::test]
    async fn test_timeout_has_no_trace() {
        let t = translate(GCD);
        let report = verify(&t, "echo '[{'\nsleep 5\n".into(), settings().with_timeout_ms(200)).await;
        let target = &report.targets[0];
        assert_eq!(target.status, TargetStatus::TimedOut);
        assert!(target.traces.is_empty());
        assert!(!target.matches_expectation());
    }

    #[tokio::test]
    async fn test_crashed_backend_is_error() {
        let t = translate(GCD);
        let report = verify(&t, String::new(), settings().with_backend("/nonexistent/jbmc")).await;
        let target = &report.targets[0];
        assert_eq!(target.status, TargetStatus::Error);
        assert!(target.errors[0].contains("/nonexistent/jbmc"));
    }

    #[tokio::test]
    async fn test_backend_receives_descriptor_and_unwind() {
        let t = Translation::new(
            "Gcd.java",
            "class Gcd {\n//@ ensures \\result > 0;\n@Verifyable @Unwind(9)\nstatic int one() { return 1; }\n}\n",
        )
        .unwrap();
        // echo the arguments back inside an error message
        let script = "printf '[{\"messageType\": \"ERROR\", \"messageText\": \"%s\"}]' \"$*\"\n".to_string();
        let report = verify(&t, script, settings()).await;
        let target = &report.targets[0];
        assert_eq!(target.status, TargetStatus::Error);
        assert_eq!(
            target.errors,
            vec!["--function Gcd.one:()I --unwind 9 --trace --json-ui"]
        );
    }
}
