//! Reference interpreter for IR modules.
//!
//! Gives the test suite a way to observe program behavior without a native
//! toolchain: a module is executed before and after obfuscation and the two
//! runs must produce the same return value and output bytes.
//!
//! The machine model is deliberately small. Memory is one flat little-endian
//! byte array; globals are materialized at startup and allocas bump-allocate
//! from the same array; pointers are plain addresses. Integers are carried
//! as sign-extended `i64` and truncated to the stored width on store.
//! Declarations dispatch by name: `print_str` copies the NUL-terminated
//! string at its pointer argument to the captured output stream. An
//! `IndirectBr` interprets its address operand as an index into its
//! destination table. Poison evaluates to zero.

use crate::function::{BlockId, InstrId};
use crate::instruction::{BinOp, ICmpPred, Op, Terminator};
use crate::module::{FuncId, GlobalId, Initializer, Module};
use crate::types::Ty;
use crate::value::{Constant, Value};
use chakravyuha_utils::errors::ExecError;
use std::collections::HashMap;

/// Result of executing a function: its return value (None for void) and the
/// bytes written to the output stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exec {
    pub ret: Option<i64>,
    pub output: Vec<u8>,
}

const DEFAULT_FUEL: u64 = 1_000_000;

/// Runs `name` with integer arguments under the default fuel budget.
pub fn run_function(module: &Module, name: &str, args: &[i64]) -> Result<Exec, ExecError> {
    run_function_with_fuel(module, name, args, DEFAULT_FUEL)
}

pub fn run_function_with_fuel(
    module: &Module,
    name: &str,
    args: &[i64],
    fuel: u64,
) -> Result<Exec, ExecError> {
    let func = module
        .function_by_name(name)
        .ok_or_else(|| ExecError::UnknownFunction(name.to_string()))?;
    let mut machine = Machine::new(module, fuel);
    let ret = machine.call(func, args.to_vec())?;
    Ok(Exec {
        ret,
        output: machine.output,
    })
}

struct Machine<'m> {
    module: &'m Module,
    mem: Vec<u8>,
    global_addrs: HashMap<GlobalId, u64>,
    output: Vec<u8>,
    fuel: u64,
    spent: u64,
}

impl<'m> Machine<'m> {
    fn new(module: &'m Module, fuel: u64) -> Machine<'m> {
        let mut machine = Machine {
            module,
            // address 0 stays unused so null reads fault
            mem: vec![0; 8],
            global_addrs: HashMap::new(),
            output: Vec::new(),
            fuel,
            spent: 0,
        };
        // two phases so forward GlobalRef initializers resolve
        for (id, global) in module.globals() {
            let addr = machine.alloc(global.ty.byte_size().max(1));
            machine.global_addrs.insert(id, addr);
        }
        for (id, global) in module.globals() {
            let addr = machine.global_addrs[&id];
            match &global.init {
                Some(Initializer::Bytes(bytes)) => {
                    machine.mem[addr as usize..addr as usize + bytes.len()]
                        .copy_from_slice(bytes);
                }
                Some(Initializer::Int { ty, value }) => {
                    let _ = machine.write_int(addr, *value, ty.byte_size());
                }
                Some(Initializer::GlobalRef(target)) => {
                    let target_addr = machine.global_addrs.get(target).copied().unwrap_or(0);
                    let _ = machine.write_int(addr, target_addr as i64, 8);
                }
                Some(Initializer::Zero) | None => {}
            }
        }
        machine
    }

    fn alloc(&mut self, size: usize) -> u64 {
        let padded = size.div_ceil(8) * 8;
        let base = self.mem.len() as u64;
        self.mem.resize(self.mem.len() + padded, 0);
        base
    }

    fn burn(&mut self) -> Result<(), ExecError> {
        self.spent += 1;
        if self.spent > self.fuel {
            return Err(ExecError::OutOfFuel(self.spent));
        }
        Ok(())
    }

    fn read_int(&self, addr: u64, size: usize) -> Result<i64, ExecError> {
        let start = addr as usize;
        let end = start + size;
        if start == 0 || end > self.mem.len() {
            return Err(ExecError::OutOfBounds(addr));
        }
        let mut raw = [0u8; 8];
        raw[..size].copy_from_slice(&self.mem[start..end]);
        let wide = i64::from_le_bytes(raw);
        // sign-extend from the stored width
        let shift = 64 - size as u32 * 8;
        Ok(if shift == 0 { wide } else { (wide << shift) >> shift })
    }

    fn write_int(&mut self, addr: u64, value: i64, size: usize) -> Result<(), ExecError> {
        let start = addr as usize;
        let end = start + size;
        if start == 0 || end > self.mem.len() {
            return Err(ExecError::OutOfBounds(addr));
        }
        self.mem[start..end].copy_from_slice(&value.to_le_bytes()[..size]);
        Ok(())
    }

    fn read_c_string(&self, addr: u64) -> Result<Vec<u8>, ExecError> {
        let mut cursor = addr as usize;
        if cursor == 0 {
            return Err(ExecError::OutOfBounds(addr));
        }
        let mut bytes = Vec::new();
        loop {
            if cursor >= self.mem.len() {
                return Err(ExecError::OutOfBounds(cursor as u64));
            }
            let byte = self.mem[cursor];
            if byte == 0 {
                return Ok(bytes);
            }
            bytes.push(byte);
            cursor += 1;
        }
    }

    fn call(&mut self, func: FuncId, args: Vec<i64>) -> Result<Option<i64>, ExecError> {
        let function = self.module.function(func);
        let Some(body) = function.body.as_ref() else {
            return self.call_external(&function.name, &args);
        };

        let mut regs: HashMap<InstrId, i64> = HashMap::new();
        let mut current = body.entry();
        let mut previous: Option<BlockId> = None;

        loop {
            self.burn()?;

            // phi nodes are a parallel copy on edge entry
            let phis = body.phis_of(current);
            if !phis.is_empty() {
                let Some(pred) = previous else {
                    return Err(ExecError::PoisonRead);
                };
                let mut staged = Vec::with_capacity(phis.len());
                for &id in &phis {
                    let Op::Phi { incomings } = &body.instr(id).op else {
                        unreachable!()
                    };
                    let (value, _) = incomings
                        .iter()
                        .find(|(_, pb)| *pb == pred)
                        .ok_or(ExecError::PoisonRead)?;
                    staged.push((id, self.eval(&regs, &args, value)?));
                }
                for (id, value) in staged {
                    regs.insert(id, value);
                }
            }

            for &id in &body.block(current).instrs {
                let data = body.instr(id);
                if data.op.is_phi() {
                    continue;
                }
                self.burn()?;
                match &data.op {
                    Op::Alloca { allocated } => {
                        let addr = self.alloc(allocated.byte_size().max(1));
                        regs.insert(id, addr as i64);
                    }
                    Op::Load { ptr } => {
                        let addr = self.eval(&regs, &args, ptr)? as u64;
                        let value = self.read_int(addr, data.ty.byte_size())?;
                        regs.insert(id, value);
                    }
                    Op::Store { value, ptr } => {
                        let size = body.value_ty(value).byte_size();
                        let raw = self.eval(&regs, &args, value)?;
                        let addr = self.eval(&regs, &args, ptr)? as u64;
                        self.write_int(addr, raw, size)?;
                    }
                    Op::Gep {
                        base_ty,
                        base,
                        indices,
                    } => {
                        let mut addr = self.eval(&regs, &args, base)?;
                        let mut cursor = base_ty.clone();
                        for (n, index) in indices.iter().enumerate() {
                            let idx = self.eval(&regs, &args, index)?;
                            if n == 0 {
                                addr += idx * cursor.byte_size() as i64;
                            } else {
                                let elem = cursor.elem().cloned().unwrap_or(Ty::I8);
                                addr += idx * elem.byte_size() as i64;
                                cursor = elem;
                            }
                        }
                        regs.insert(id, addr);
                    }
                    Op::BitCast { value } => {
                        let raw = self.eval(&regs, &args, value)?;
                        regs.insert(id, raw);
                    }
                    Op::Call { callee, args: call_args } => {
                        let mut lowered = Vec::with_capacity(call_args.len());
                        for arg in call_args {
                            lowered.push(self.eval(&regs, &args, arg)?);
                        }
                        let ret = self.call(*callee, lowered)?;
                        if let Some(value) = ret {
                            regs.insert(id, value);
                        }
                    }
                    Op::Select {
                        cond,
                        if_true,
                        if_false,
                    } => {
                        let chosen = if self.eval(&regs, &args, cond)? != 0 {
                            if_true
                        } else {
                            if_false
                        };
                        let value = self.eval(&regs, &args, chosen)?;
                        regs.insert(id, value);
                    }
                    Op::ICmp { pred, lhs, rhs } => {
                        let l = self.eval(&regs, &args, lhs)?;
                        let r = self.eval(&regs, &args, rhs)?;
                        let hit = match pred {
                            ICmpPred::Eq => l == r,
                            ICmpPred::Ne => l != r,
                            ICmpPred::Slt => l < r,
                            ICmpPred::Sle => l <= r,
                            ICmpPred::Sgt => l > r,
                            ICmpPred::Sge => l >= r,
                        };
                        regs.insert(id, hit as i64);
                    }
                    Op::Bin { op, lhs, rhs } => {
                        let l = self.eval(&regs, &args, lhs)?;
                        let r = self.eval(&regs, &args, rhs)?;
                        let value = match op {
                            BinOp::Add => l.wrapping_add(r),
                            BinOp::Mul => l.wrapping_mul(r),
                            BinOp::Xor => l ^ r,
                            BinOp::Shl => l.wrapping_shl(r as u32 & 63),
                        };
                        regs.insert(id, value);
                    }
                    Op::Phi { .. } => unreachable!("phis handled on block entry"),
                }
            }

            let term = body
                .terminator(current)
                .ok_or_else(|| ExecError::UnreachableExecuted(function.name.clone()))?;
            match term {
                Terminator::Br { dest } => {
                    previous = Some(current);
                    current = *dest;
                }
                Terminator::CondBr {
                    cond,
                    then_dest,
                    else_dest,
                } => {
                    let taken = if self.eval(&regs, &args, cond)? != 0 {
                        *then_dest
                    } else {
                        *else_dest
                    };
                    previous = Some(current);
                    current = taken;
                }
                Terminator::Switch {
                    cond,
                    default,
                    cases,
                } => {
                    let scrutinee = self.eval(&regs, &args, cond)?;
                    let taken = cases
                        .iter()
                        .find(|(v, _)| *v == scrutinee)
                        .map(|(_, dest)| *dest)
                        .unwrap_or(*default);
                    previous = Some(current);
                    current = taken;
                }
                Terminator::Ret { value } => {
                    return match value {
                        Some(v) => Ok(Some(self.eval(&regs, &args, v)?)),
                        None => Ok(None),
                    };
                }
                Terminator::Unreachable => {
                    return Err(ExecError::UnreachableExecuted(function.name.clone()));
                }
                Terminator::IndirectBr {
                    address,
                    destinations,
                } => {
                    let index = self.eval(&regs, &args, address)?;
                    let taken = destinations
                        .get(index as usize)
                        .copied()
                        .ok_or(ExecError::BadIndirectTarget(index as u64))?;
                    previous = Some(current);
                    current = taken;
                }
            }
        }
    }

    fn call_external(&mut self, name: &str, args: &[i64]) -> Result<Option<i64>, ExecError> {
        match name {
            "print_str" => {
                let addr = *args.first().ok_or(ExecError::PoisonRead)?;
                let bytes = self.read_c_string(addr as u64)?;
                self.output.extend_from_slice(&bytes);
                Ok(None)
            }
            other => Err(ExecError::UnknownExternal(other.to_string())),
        }
    }

    fn eval(
        &self,
        regs: &HashMap<InstrId, i64>,
        args: &[i64],
        value: &Value,
    ) -> Result<i64, ExecError> {
        match value {
            Value::Instr(id) => regs.get(id).copied().ok_or(ExecError::PoisonRead),
            Value::Arg(i) => args.get(*i as usize).copied().ok_or(ExecError::PoisonRead),
            Value::Global(id) => self
                .global_addrs
                .get(id)
                .map(|&a| a as i64)
                .ok_or(ExecError::OutOfBounds(0)),
            Value::Const(Constant::Int { value, .. }) => Ok(*value),
            Value::Const(Constant::Null) => Ok(0),
            // frozen poison: an arbitrary but fixed bit pattern
            Value::Const(Constant::Poison(_)) => Ok(0),
            Value::Const(Constant::Bytes(_)) => Err(ExecError::PoisonRead),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::Builder;
    use crate::function::{Function, Param};
    use crate::module::{GlobalVariable, Linkage};

    fn param(name: &str, ty: Ty) -> Param {
        Param {
            name: name.to_string(),
            ty,
        }
    }

    /// int sum(void) { int s = 0; for (int i = 0; i < 10; i++) s += i; return s; }
    fn loop_sum_module() -> Module {
        let mut m = Module::new("loops");
        let mut f = Function::new_definition("sum", vec![], Ty::I32);
        let body = f.body.as_mut().unwrap();
        let entry = body.entry();
        let header = body.add_block("header");
        let loop_body = body.add_block("body");
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
                then_dest: loop_body,
                else_dest: exit,
            },
        );

        let mut b = Builder::at_block_end(body, loop_body);
        let s_next = b.add(s.clone(), i.clone(), "s.next");
        let i_next = b.add(i.clone(), Value::i32(1), "i.next");
        body.set_terminator(loop_body, Terminator::Br { dest: header });

        // patch the phis with the back-edge values
        let i_id = i.as_instr().unwrap();
        let s_id = s.as_instr().unwrap();
        if let Op::Phi { incomings } = &mut body.instr_mut(i_id).op {
            incomings.push((i_next, loop_body));
        }
        if let Op::Phi { incomings } = &mut body.instr_mut(s_id).op {
            incomings.push((s_next, loop_body));
        }
        body.set_terminator(exit, Terminator::Ret { value: Some(s) });

        m.add_function(f);
        m
    }

    #[test]
    fn test_loop_sum_is_45() {
        let m = loop_sum_module();
        let exec = run_function(&m, "sum", &[]).unwrap();
        assert_eq!(exec.ret, Some(45));
    }

    #[test]
    fn test_print_str_collects_output() {
        let mut m = Module::new("hello");
        let g = m.add_global(GlobalVariable {
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
        b.call(Ty::Void, print, vec![Value::Global(g)], "");
        body.set_terminator(
            entry,
            Terminator::Ret {
                value: Some(Value::i32(0)),
            },
        );
        m.add_function(f);

        let exec = run_function(&m, "main", &[]).unwrap();
        assert_eq!(exec.ret, Some(0));
        assert_eq!(exec.output, b"hello\n");
    }

    #[test]
    fn test_memory_round_trip_through_alloca() {
        let mut m = Module::new("mem");
        let mut f = Function::new_definition("f", vec![param("x", Ty::I32)], Ty::I32);
        let body = f.body.as_mut().unwrap();
        let entry = body.entry();
        let mut b = Builder::at_block_end(body, entry);
        let slot = b.alloca(Ty::I32, "slot");
        b.store(Value::Arg(0), slot.clone());
        let back = b.load(Ty::I32, slot, "back");
        body.set_terminator(entry, Terminator::Ret { value: Some(back) });
        m.add_function(f);

        assert_eq!(run_function(&m, "f", &[-7]).unwrap().ret, Some(-7));
        assert_eq!(run_function(&m, "f", &[41]).unwrap().ret, Some(41));
    }

    #[test]
    fn test_fuel_limit_stops_infinite_loop() {
        let mut m = Module::new("spin");
        let mut f = Function::new_definition("spin", vec![], Ty::Void);
        let body = f.body.as_mut().unwrap();
        let entry = body.entry();
        body.set_terminator(entry, Terminator::Br { dest: entry });
        m.add_function(f);
        assert!(matches!(
            run_function_with_fuel(&m, "spin", &[], 1000),
            Err(ExecError::OutOfFuel(_))
        ));
    }

    #[test]
    fn test_indirect_branch_indexes_destinations() {
        let mut m = Module::new("goto");
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
        assert_eq!(run_function(&m, "pick", &[0]).unwrap().ret, Some(10));
        assert_eq!(run_function(&m, "pick", &[1]).unwrap().ret, Some(20));
    }
}
