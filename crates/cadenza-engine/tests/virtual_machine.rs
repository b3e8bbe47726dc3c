//! End to end tests: compile source, run it on the virtual machine, and
//! answer its message dispatches from a small host loop.

use cadenza_engine::{
    DispatchRecord, FunctionDef, InterruptCode, Pipeline, PipelineConfig, Slot, Symbol, ThreadContext,
    VirtualMachine, VmOutcome,
};
use cadenza_sdk::PAYLOAD_MASK;

fn pipeline() -> Pipeline {
    Pipeline::new(PipelineConfig::default().with_validation(true))
}

/// Messages the host answered, by selector name.
#[derive(Default)]
struct Host {
    log: Vec<(String, DispatchRecord)>,
}

impl Host {
    fn selector(context: &ThreadContext, record: &DispatchRecord) -> String {
        let symbol = Symbol::from_slot(record.selector).expect("selector is a symbol");
        context.name_of(symbol)
    }

    fn int(slot: Slot) -> i32 {
        slot.get_int32().expect("integer operand")
    }

    fn answer(&mut self, context: &ThreadContext, record: DispatchRecord) -> Slot {
        let selector = Self::selector(context, &record);
        let result = match selector.as_str() {
            "+" => Slot::make_int32(Self::int(record.arguments[0]) + Self::int(record.arguments[1])),
            "-" => Slot::make_int32(Self::int(record.arguments[0]) - Self::int(record.arguments[1])),
            "*" => Slot::make_int32(Self::int(record.arguments[0]) * Self::int(record.arguments[1])),
            "<" => Slot::make_bool(Self::int(record.arguments[0]) < Self::int(record.arguments[1])),
            other => panic!("unexpected message {}", other),
        };
        self.log.push((selector, record));
        result
    }

    fn run(&mut self, context: &ThreadContext, vm: &mut VirtualMachine, def: &FunctionDef, arguments: &[Slot]) -> Slot {
        let mut outcome = vm.run(def, arguments).expect("run");
        loop {
            match outcome {
                VmOutcome::Returned(value) => return value,
                VmOutcome::Interrupted(InterruptCode::Dispatch) => {
                    let record = vm.dispatch_record().expect("dispatch record");
                    let result = self.answer(context, record);
                    outcome = vm.resume_with(result).expect("resume");
                }
                VmOutcome::Interrupted(other) => panic!("unexpected interrupt {:?}", other),
            }
        }
    }
}

fn evaluate(source: &str) -> (Slot, Host) {
    evaluate_with(pipeline(), source)
}

fn evaluate_with(pipeline: Pipeline, source: &str) -> (Slot, Host) {
    let mut context = ThreadContext::new().unwrap();
    let artifacts = pipeline.compile_code(&mut context, source).unwrap();
    let def = context.heap.function_def(artifacts.function_def).unwrap().clone();
    let mut host = Host::default();
    let mut vm = VirtualMachine::new();
    let value = host.run(&context, &mut vm, &def, &[]);
    (value, host)
}

// =============================================================================
// EXPRESSIONS
// =============================================================================

mod expressions {
    use super::*;

    #[test]
    fn test_nil() {
        let (value, host) = evaluate("nil");
        assert_eq!(value, Slot::NIL);
        assert!(host.log.is_empty());
    }

    #[test]
    fn test_explicit_return() {
        assert_eq!(evaluate("^42").0, Slot::make_int32(42));
    }

    #[test]
    fn test_binop_dispatches_to_host() {
        let (value, host) = evaluate("3 + 4");
        assert_eq!(value, Slot::make_int32(7));
        assert_eq!(host.log.len(), 1);
        let (selector, record) = &host.log[0];
        assert_eq!(selector, "+");
        assert_eq!(record.arguments, vec![Slot::make_int32(3), Slot::make_int32(4)]);
        assert!(record.keyword_arguments.is_empty());
        assert!(!record.is_super);
    }

    #[test]
    fn test_variables_flow_between_messages() {
        let (value, host) = evaluate("var a = 2, b = 5, c; c = a * b; c - a");
        assert_eq!(value, Slot::make_int32(8));
        assert_eq!(host.log.len(), 2);
    }
}

// =============================================================================
// CONTROL FLOW
// =============================================================================

mod control_flow {
    use super::*;

    #[test]
    fn test_if_true_takes_first_arm() {
        assert_eq!(evaluate("if(true, {1}, {2})").0, Slot::make_int32(1));
    }

    #[test]
    fn test_if_false_takes_second_arm() {
        assert_eq!(evaluate("if(false, {1}, {2})").0, Slot::make_int32(2));
    }

    #[test]
    fn test_if_on_a_computed_condition() {
        let (value, host) = evaluate("var x = 3; if(x < 5, {x + 10}, {x - 10})");
        assert_eq!(value, Slot::make_int32(13));
        assert_eq!(host.log.len(), 2);
    }

    #[test]
    fn test_while_loop_counts() {
        let (value, host) = evaluate("var i = 0; while({ i < 10 }, { i = i + 1 }); i");
        assert_eq!(value, Slot::make_int32(10));
        let comparisons = host.log.iter().filter(|(selector, _)| selector == "<").count();
        assert_eq!(comparisons, 11);
    }

    #[test]
    fn test_while_loop_with_two_carried_values() {
        let source = "var i = 0, sum = 0; while({ i < 5 }, { sum = sum + i; i = i + 1 }); sum";
        assert_eq!(evaluate(source).0, Slot::make_int32(10));
    }
}

// =============================================================================
// REGISTER PRESSURE
// =============================================================================

mod register_pressure {
    use super::*;

    const PROGRAMS: &[(&str, i32)] = &[
        ("var x = 1, y = 2; var i = 0; while({ i < 3 }, { var t = x; x = y; y = t; i = i + 1 }); x * 10 + y", 21),
        ("var a = 5, b = 7, i = 0; while({ i < 5 }, { if(a < b, { a = a + 3 }, { b = b + 2 }); i = i + 1 }); a * 100 + b", 1113),
        ("var i = 0, sum = 0; while({ i < 5 }, { sum = sum + i; i = i + 1 }); sum", 10),
    ];

    #[test]
    fn test_loops_run_at_every_register_count() {
        for registers in [5, 6, 8, 16] {
            for (source, expected) in PROGRAMS {
                let config = PipelineConfig::default().with_validation(true).with_registers(registers);
                let (value, _) = evaluate_with(Pipeline::new(config), source);
                assert_eq!(value, Slot::make_int32(*expected), "{} with {} registers", source, registers);
            }
        }
    }
}

// =============================================================================
// BLOCKS
// =============================================================================

mod blocks {
    use super::*;

    #[test]
    fn test_block_literal_is_a_function_object() {
        let mut context = ThreadContext::new().unwrap();
        let artifacts = pipeline()
            .compile_code(&mut context, "{ arg a, b; a + b }.value(4, 5)")
            .unwrap();
        let def = context.heap.function_def(artifacts.function_def).unwrap().clone();

        let mut vm = VirtualMachine::new();
        let outcome = vm.run(&def, &[]).unwrap();
        assert_eq!(outcome, VmOutcome::Interrupted(InterruptCode::Dispatch));
        let record = vm.dispatch_record().unwrap();
        assert_eq!(Host::selector(&context, &record), "value");
        assert_eq!(record.arguments.len(), 3);
        assert_eq!(&record.arguments[1..], &[Slot::make_int32(4), Slot::make_int32(5)]);

        let object = record.arguments[0];
        assert!(object.is_pointer());
        let address = object.as_bits() & PAYLOAD_MASK;
        let inner = vm.read_word(address + 8).unwrap();
        let inner = context.heap.function_def(Slot::from_bits(inner)).unwrap();
        assert_eq!(inner.argument_count(), 3);

        let mut host = Host::default();
        let mut block_vm = VirtualMachine::new();
        let value = host.run(&context, &mut block_vm, inner, &record.arguments);
        assert_eq!(value, Slot::make_int32(9));

        let outcome = vm.resume_with(value).unwrap();
        assert_eq!(outcome, VmOutcome::Returned(Slot::make_int32(9)));
    }
}

// =============================================================================
// CLASS VARIABLES
// =============================================================================

mod class_variables {
    use super::*;

    #[test]
    fn test_method_reads_and_writes_class_variable() {
        let mut context = ThreadContext::new().unwrap();
        let source = "Tally { classvar total = 7; total { ^total } bump { total = total + 1; ^total } }";
        pipeline().compile_class_file(&mut context, source).unwrap();

        let tally = context.intern("Tally").unwrap();
        let method = |name: &str| -> FunctionDef {
            let class = context.class_library.class(tally).unwrap();
            let method = class.method(context.intern(name).unwrap(), false).unwrap();
            context.heap.function_def(method.function.unwrap()).unwrap().clone()
        };
        let (total, bump) = (method("total"), method("bump"));

        let mut vm = VirtualMachine::new();
        vm.set_class_variables(context.class_library.class_variable_values()).unwrap();
        let mut host = Host::default();
        assert_eq!(host.run(&context, &mut vm, &total, &[Slot::NIL]), Slot::make_int32(7));
        assert_eq!(host.run(&context, &mut vm, &bump, &[Slot::NIL]), Slot::make_int32(8));
        assert_eq!(host.run(&context, &mut vm, &total, &[Slot::NIL]), Slot::make_int32(8));
    }
}
