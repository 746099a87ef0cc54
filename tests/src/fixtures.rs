//! Hand-built IR modules used across the integration tests.
//!
//! Each fixture mirrors a small C program compiled without optimizations,
//! which is the input shape the obfuscator is designed for.

use chakravyuha_core::{
    Builder, Function, GlobalVariable, ICmpPred, Initializer, Linkage, Module, Op, Param,
    Terminator, Ty, Value,
};

fn param(name: &str, ty: Ty) -> Param {
    Param {
        name: name.to_string(),
        ty,
    }
}

/// `int main(void) { return 0; }` with no string globals.
pub fn trivial_main() -> Module {
    let mut m = Module::new("trivial");
    let mut f = Function::new_definition("main", vec![], Ty::I32);
    let body = f.body.as_mut().unwrap();
    body.set_terminator(
        body.entry(),
        Terminator::Ret {
            value: Some(Value::i32(0)),
        },
    );
    m.add_function(f);
    m
}

/// `int main(void) { print_str("hello\n"); return 0; }`
pub fn hello_world() -> Module {
    let mut m = Module::new("hello");
    let message = m.add_global(GlobalVariable {
        name: ".str".to_string(),
        ty: Ty::array(Ty::I8, 7),
        is_constant: true,
        linkage: Linkage::Private,
        init: Some(Initializer::Bytes(b"hello\n\0".to_vec())),
    });
    let print = m.add_function(Function::new_declaration(
        "print_str",
        vec![param("s", Ty::Ptr)],
        Ty::Void,
    ));
    let mut f = Function::new_definition("main", vec![], Ty::I32);
    let body = f.body.as_mut().unwrap();
    let entry = body.entry();
    let mut b = Builder::at_block_end(body, entry);
    b.call(Ty::Void, print, vec![Value::Global(message)], "");
    body.set_terminator(
        entry,
        Terminator::Ret {
            value: Some(Value::i32(0)),
        },
    );
    m.add_function(f);
    m
}

/// `int sign(int x) { if (x > 0) return 1; else return -1; }`
pub fn branch_on_input() -> Module {
    let mut m = Module::new("branch");
    let mut f = Function::new_definition("sign", vec![param("x", Ty::I32)], Ty::I32);
    let body = f.body.as_mut().unwrap();
    let entry = body.entry();
    let pos = body.add_block("pos");
    let neg = body.add_block("neg");
    let mut b = Builder::at_block_end(body, entry);
    let cond = b.icmp(ICmpPred::Sgt, Value::Arg(0), Value::i32(0), "is.pos");
    body.set_terminator(
        entry,
        Terminator::CondBr {
            cond,
            then_dest: pos,
            else_dest: neg,
        },
    );
    body.set_terminator(
        pos,
        Terminator::Ret {
            value: Some(Value::i32(1)),
        },
    );
    body.set_terminator(
        neg,
        Terminator::Ret {
            value: Some(Value::i32(-1)),
        },
    );
    m.add_function(f);
    m
}

/// A four-case switch on a byte, each case routing through a shared exit:
///
/// ```c
/// int classify(char x) {
///     int r;
///     switch (x) {
///     case 1: r = 10; break;
///     case 2: r = 20; break;
///     case 3: r = 30; break;
///     case 4: r = 40; break;
///     default: r = -1; break;
///     }
///     return r;
/// }
/// ```
pub fn switch_on_byte() -> Module {
    let mut m = Module::new("switchy");
    let mut f = Function::new_definition("classify", vec![param("x", Ty::I8)], Ty::I32);
    let body = f.body.as_mut().unwrap();
    let entry = body.entry();
    let exit = body.add_block("exit");
    let default = body.add_block("default");

    let slot = {
        let mut b = Builder::at_block_end(body, entry);
        b.alloca(Ty::I32, "r")
    };

    let mut cases = Vec::new();
    for case in 1..=4i64 {
        let block = body.add_block(&format!("case{case}"));
        let mut b = Builder::at_block_end(body, block);
        b.store(Value::i32(case * 10), slot.clone());
        body.set_terminator(block, Terminator::Br { dest: exit });
        cases.push((case, block));
    }
    {
        let mut b = Builder::at_block_end(body, default);
        b.store(Value::i32(-1), slot.clone());
        body.set_terminator(default, Terminator::Br { dest: exit });
    }
    body.set_terminator(
        entry,
        Terminator::Switch {
            cond: Value::Arg(0),
            default,
            cases,
        },
    );
    {
        let mut b = Builder::at_block_end(body, exit);
        let r = b.load(Ty::I32, slot, "r.val");
        body.set_terminator(exit, Terminator::Ret { value: Some(r) });
    }
    m.add_function(f);
    m
}

/// `int sum(void) { int s = 0; for (int i = 0; i < 10; i++) s += i; return s; }`
/// The induction variables are phis that flattening must demote.
pub fn loop_sum() -> Module {
    let mut m = Module::new("loops");
    let mut f = Function::new_definition("sum", vec![], Ty::I32);
    let body = f.body.as_mut().unwrap();
    let entry = body.entry();
    let header = body.add_block("header");
    let latch = body.add_block("latch");
    let exit = body.add_block("exit");
    body.set_terminator(entry, Terminator::Br { dest: header });

    let mut b = Builder::at_block_end(body, header);
    let i = b.phi(Ty::I32, vec![(Value::i32(0), entry)], "i");
    let s = b.phi(Ty::I32, vec![(Value::i32(0), entry)], "s");
    let cond = b.icmp(ICmpPred::Slt, i.clone(), Value::i32(10), "cond");
    body.set_terminator(
        header,
        Terminator::CondBr {
            cond,
            then_dest: latch,
            else_dest: exit,
        },
    );

    let mut b = Builder::at_block_end(body, latch);
    let s_next = b.add(s.clone(), i.clone(), "s.next");
    let i_next = b.add(i.clone(), Value::i32(1), "i.next");
    body.set_terminator(latch, Terminator::Br { dest: header });
    for (phi, next) in [(&i, i_next), (&s, s_next)] {
        let id = phi.as_instr().unwrap();
        if let Op::Phi { incomings } = &mut body.instr_mut(id).op {
            incomings.push((next, latch));
        }
    }
    body.set_terminator(exit, Terminator::Ret { value: Some(s) });
    m.add_function(f);
    m
}

/// A computed goto plus a string use, so string encryption has work to do in
/// a function control-flow flattening must refuse:
///
/// ```c
/// int pick(long i) {
///     static void *table[] = { &&a, &&b };
///     goto *table[i];
/// a:  print_str("ok\n"); return 10;
/// b:  return 20;
/// }
/// ```
pub fn computed_goto() -> Module {
    let mut m = Module::new("goto");
    let message = m.add_global(GlobalVariable {
        name: ".str.ok".to_string(),
        ty: Ty::array(Ty::I8, 4),
        is_constant: true,
        linkage: Linkage::Private,
        init: Some(Initializer::Bytes(b"ok\n\0".to_vec())),
    });
    let print = m.add_function(Function::new_declaration(
        "print_str",
        vec![param("s", Ty::Ptr)],
        Ty::Void,
    ));
    let mut f = Function::new_definition("pick", vec![param("i", Ty::I64)], Ty::I32);
    let body = f.body.as_mut().unwrap();
    let entry = body.entry();
    let a = body.add_block("a");
    let bb = body.add_block("b");
    body.set_terminator(
        entry,
        Terminator::IndirectBr {
            address: Value::Arg(0),
            destinations: vec![a, bb],
        },
    );
    let mut b = Builder::at_block_end(body, a);
    b.call(Ty::Void, print, vec![Value::Global(message)], "");
    body.set_terminator(
        a,
        Terminator::Ret {
            value: Some(Value::i32(10)),
        },
    );
    body.set_terminator(
        bb,
        Terminator::Ret {
            value: Some(Value::i32(20)),
        },
    );
    m.add_function(f);
    m
}

/// The whole corpus as `(module, entry function, argument sets)` for
/// equivalence sweeps.
pub fn corpus() -> Vec<(Module, &'static str, Vec<Vec<i64>>)> {
    vec![
        (trivial_main(), "main", vec![vec![]]),
        (hello_world(), "main", vec![vec![]]),
        (
            branch_on_input(),
            "sign",
            vec![vec![5], vec![-7], vec![0]],
        ),
        (
            switch_on_byte(),
            "classify",
            vec![vec![0], vec![1], vec![2], vec![3], vec![4], vec![5]],
        ),
        (loop_sum(), "sum", vec![vec![]]),
        (computed_goto(), "pick", vec![vec![0], vec![1]]),
    ]
}
