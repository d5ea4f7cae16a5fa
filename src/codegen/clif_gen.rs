//! Typed program to Cranelift IR lowering
//!
//! The translation follows these rules:
//! - every local lives in its own stack slot
//! - every scalar is an integer as wide as its C type
//! - `switch` becomes a compare chain, loops map onto plain blocks
//!
//! Semantic analysis has already made conversions, decay and pointer
//! scaling explicit, so nothing here reasons about C typing rules beyond
//! width and signedness.

use cranelift::codegen::ir::{StackSlot, StackSlotData, StackSlotKind};
use cranelift::codegen::isa::CallConv;
use cranelift::prelude::{
    AbiParam, Block, Configurable, FunctionBuilderContext, InstBuilder, IntCC, MemFlags, Signature, Type, Value,
    types,
};
use cranelift_frontend::FunctionBuilder;
use cranelift_module::{DataDescription, DataId, FuncId, Linkage, Module};
use cranelift_object::{ObjectBuilder, ObjectModule};
use hashbrown::HashMap;
use log::{debug, trace};
use target_lexicon::{Architecture, Triple};

use super::{CodegenError, CodegenOptions};
use crate::semantic::typed_ast::{
    BinOp, Callee, Function, GlobalInit, Linkage as CLinkage, Program, SymbolTarget, TExpr, TExprKind, TStmt, UnOp,
};
use crate::types::{CType, FunctionType};

type CgResult<T> = Result<T, CodegenError>;

/// Width of the Cranelift value holding a C scalar
fn value_type(ty: &CType) -> Type {
    match ty {
        CType::Bool | CType::Char { .. } => types::I8,
        CType::Short { .. } => types::I16,
        CType::Int { .. } => types::I32,
        _ => types::I64,
    }
}

/// Parameter or return slot; sub-int values are extended per the C ABIs
fn abi_param(ty: &CType) -> AbiParam {
    let param = AbiParam::new(value_type(ty));
    if value_type(ty).bits() >= 32 {
        param
    } else if ty.is_signed() {
        param.sext()
    } else {
        param.uext()
    }
}

fn lower_linkage(linkage: CLinkage) -> Linkage {
    match linkage {
        CLinkage::External => Linkage::Export,
        CLinkage::Internal => Linkage::Local,
    }
}

fn int_cc(op: BinOp, signed: bool) -> IntCC {
    match (op, signed) {
        (BinOp::Eq, _) => IntCC::Equal,
        (BinOp::Ne, _) => IntCC::NotEqual,
        (BinOp::Lt, true) => IntCC::SignedLessThan,
        (BinOp::Lt, false) => IntCC::UnsignedLessThan,
        (BinOp::Le, true) => IntCC::SignedLessThanOrEqual,
        (BinOp::Le, false) => IntCC::UnsignedLessThanOrEqual,
        (BinOp::Gt, true) => IntCC::SignedGreaterThan,
        (BinOp::Gt, false) => IntCC::UnsignedGreaterThan,
        (BinOp::Ge, true) => IntCC::SignedGreaterThanOrEqual,
        (_, _) => IntCC::UnsignedGreaterThanOrEqual,
    }
}

/// Module-level state shared by every function body
struct ModuleCtx<'p> {
    module: ObjectModule,
    program: &'p Program,
    triple: Triple,
    functions: HashMap<String, FuncId>,
    globals: HashMap<String, DataId>,
    strings: Vec<DataId>,
    set_al_func: Option<FuncId>,
}

impl ModuleCtx<'_> {
    fn signature(&self, fn_ty: &FunctionType) -> Signature {
        let mut sig = self.module.make_signature();
        sig.params.extend(fn_ty.params.iter().map(abi_param));
        if !fn_ty.ret.is_void() {
            sig.returns.push(abi_param(&fn_ty.ret));
        }
        sig
    }

    /// Defined functions are declared up front; everything else is imported on first use
    fn function_id(&mut self, name: &str) -> CgResult<FuncId> {
        if let Some(id) = self.functions.get(name) {
            return Ok(*id);
        }
        let decl = self
            .program
            .function_decl(name)
            .ok_or_else(|| CodegenError::Internal(format!("reference to undeclared function '{}'", name)))?;
        let sig = self.signature(&decl.ty);
        let id = self.module.declare_function(name, Linkage::Import, &sig)?;
        trace!("imported function {}", name);
        self.functions.insert(name.to_string(), id);
        Ok(id)
    }

    fn global_id(&mut self, name: &str) -> CgResult<DataId> {
        if let Some(id) = self.globals.get(name) {
            return Ok(*id);
        }
        let id = self.module.declare_data(name, Linkage::Import, true, false)?;
        trace!("imported data {}", name);
        self.globals.insert(name.to_string(), id);
        Ok(id)
    }

    fn data_id(&mut self, target: &SymbolTarget) -> CgResult<DataId> {
        match target {
            SymbolTarget::Global(name) => self.global_id(name),
            SymbolTarget::String(index) => self
                .strings
                .get(*index)
                .copied()
                .ok_or_else(|| CodegenError::Internal(format!("string literal {} was never interned", index))),
            SymbolTarget::Function(name) => Err(CodegenError::Internal(format!(
                "function '{}' used as a data object",
                name
            ))),
        }
    }

    /// Internal helper for variadic calls on x86_64 SysV: returns its
    /// arguments unchanged, which leaves the vector register count in %al.
    fn set_al_func(&mut self) -> CgResult<FuncId> {
        if let Some(id) = self.set_al_func {
            return Ok(id);
        }
        let mut sig = Signature::new(CallConv::SystemV);
        sig.params.push(AbiParam::new(types::I64)); // count
        sig.params.push(AbiParam::new(types::I64)); // addr
        sig.returns.push(AbiParam::new(types::I64)); // count (RAX)
        sig.returns.push(AbiParam::new(types::I64)); // addr (RDX)

        let func_id = self.module.declare_function("__cendol_set_al", Linkage::Local, &sig)?;

        let mut ctx = self.module.make_context();
        ctx.func.signature = sig;
        let mut func_ctx = FunctionBuilderContext::new();
        let mut builder = FunctionBuilder::new(&mut ctx.func, &mut func_ctx);
        let block = builder.create_block();
        builder.append_block_params_for_function_params(block);
        builder.switch_to_block(block);
        builder.seal_block(block);
        let params = builder.block_params(block).to_vec();
        builder.ins().return_(&params);
        builder.finalize();

        self.module.define_function(func_id, &mut ctx)?;
        self.set_al_func = Some(func_id);
        Ok(func_id)
    }
}

/// Typed program to Cranelift lowerer
pub(crate) struct ClifGen<'p> {
    ctx: ModuleCtx<'p>,
    builder_context: FunctionBuilderContext,
}

impl<'p> ClifGen<'p> {
    pub(crate) fn new(program: &'p Program, options: &CodegenOptions) -> CgResult<Self> {
        let triple = options.triple.clone();
        let mut flag_builder = cranelift::prelude::settings::builder();
        flag_builder
            .set("is_pic", "true")
            .map_err(|e| CodegenError::Settings(e.to_string()))?;
        flag_builder
            .set("opt_level", options.opt_level.as_setting())
            .map_err(|e| CodegenError::Settings(e.to_string()))?;

        let isa_builder = if triple == Triple::host() {
            cranelift_native::builder().map_err(|reason| CodegenError::UnsupportedTarget {
                triple: triple.to_string(),
                reason: reason.to_string(),
            })?
        } else {
            cranelift::prelude::isa::lookup(triple.clone()).map_err(|e| CodegenError::UnsupportedTarget {
                triple: triple.to_string(),
                reason: e.to_string(),
            })?
        };
        let isa = isa_builder.finish(cranelift::prelude::settings::Flags::new(flag_builder))?;
        debug!("code generation for {} at opt_level {}", triple, options.opt_level.as_setting());

        let builder = ObjectBuilder::new(isa, "cendol-embed", cranelift_module::default_libcall_names())?;
        Ok(ClifGen {
            ctx: ModuleCtx {
                module: ObjectModule::new(builder),
                program,
                triple,
                functions: HashMap::new(),
                globals: HashMap::new(),
                strings: Vec::new(),
                set_al_func: None,
            },
            builder_context: FunctionBuilderContext::new(),
        })
    }

    pub(crate) fn compile(mut self) -> CgResult<Vec<u8>> {
        self.declare_symbols()?;
        self.define_data()?;
        let program = self.ctx.program;
        for function in &program.functions {
            self.define_function(function)?;
        }
        let product = self.ctx.module.finish();
        product.emit().map_err(|e| CodegenError::Object(e.to_string()))
    }

    fn declare_symbols(&mut self) -> CgResult<()> {
        let program = self.ctx.program;
        for index in 0..program.strings.len() {
            let id = self
                .ctx
                .module
                .declare_data(&format!(".L.str.{}", index), Linkage::Local, false, false)?;
            self.ctx.strings.push(id);
        }
        for global in &program.globals {
            if global.init == GlobalInit::Extern {
                continue;
            }
            let id = self
                .ctx
                .module
                .declare_data(&global.name, lower_linkage(global.linkage), !global.readonly, false)?;
            self.ctx.globals.insert(global.name.clone(), id);
        }
        for function in &program.functions {
            let sig = self.ctx.signature(&function.ty);
            let id = self
                .ctx
                .module
                .declare_function(&function.name, lower_linkage(function.linkage), &sig)?;
            self.ctx.functions.insert(function.name.clone(), id);
        }
        Ok(())
    }

    fn define_data(&mut self) -> CgResult<()> {
        let program = self.ctx.program;
        for (bytes, id) in program.strings.iter().zip(self.ctx.strings.clone()) {
            let mut desc = DataDescription::new();
            desc.define(bytes.clone().into_boxed_slice());
            desc.set_align(1);
            self.ctx.module.define_data(id, &desc)?;
        }

        for global in &program.globals {
            let mut desc = DataDescription::new();
            match &global.init {
                GlobalInit::Extern => continue,
                GlobalInit::Zero => desc.define_zeroinit(global.ty.size().max(1) as usize),
                GlobalInit::Data { bytes, relocs } => {
                    desc.define(bytes.clone().into_boxed_slice());
                    for reloc in relocs {
                        let offset = reloc.offset as u32;
                        if let SymbolTarget::Function(name) = &reloc.target {
                            if reloc.addend != 0 {
                                return Err(CodegenError::Internal(format!(
                                    "address of function '{}' with offset {} in '{}'",
                                    name, reloc.addend, global.name
                                )));
                            }
                            let func_id = self.ctx.function_id(name)?;
                            let func_ref = self.ctx.module.declare_func_in_data(func_id, &mut desc);
                            desc.write_function_addr(offset, func_ref);
                        } else {
                            let data_id = self.ctx.data_id(&reloc.target)?;
                            let gv = self.ctx.module.declare_data_in_data(data_id, &mut desc);
                            desc.write_data_addr(offset, gv, reloc.addend);
                        }
                    }
                }
            }
            desc.set_align(global.ty.align().max(1));
            let id = self.ctx.global_id(&global.name)?;
            trace!("defining data {} ({} bytes)", global.name, global.ty.size());
            self.ctx.module.define_data(id, &desc)?;
        }
        Ok(())
    }

    fn define_function(&mut self, function: &'p Function) -> CgResult<()> {
        debug!("lowering function {}", function.name);
        let func_id = self.ctx.function_id(&function.name)?;
        let mut func_ctx = self.ctx.module.make_context();
        func_ctx.func.signature = self.ctx.signature(&function.ty);

        let builder = FunctionBuilder::new(&mut func_ctx.func, &mut self.builder_context);
        let lowering = FunctionLowering {
            builder,
            ctx: &mut self.ctx,
            function,
            slots: Vec::with_capacity(function.locals.len()),
            breakables: Vec::new(),
            switches: Vec::new(),
            block_state: BlockState::Empty,
        };
        lowering.lower_body()?;

        self.ctx.module.define_function(func_id, &mut func_ctx)?;
        self.ctx.module.clear_context(&mut func_ctx);
        Ok(())
    }
}

/// Jump targets of an enclosing loop or switch
struct Breakable {
    exit: Block,
    /// `None` for a switch
    next: Option<Block>,
}

/// Whether the current block already ends in a terminator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockState {
    Empty,
    Filled,
}

struct SwitchTargets {
    cases: Vec<Block>,
    default: Option<Block>,
}

/// Lowers one function body
struct FunctionLowering<'a, 'b, 'p> {
    builder: FunctionBuilder<'b>,
    ctx: &'a mut ModuleCtx<'p>,
    function: &'p Function,
    slots: Vec<StackSlot>,
    breakables: Vec<Breakable>,
    switches: Vec<SwitchTargets>,
    block_state: BlockState,
}

impl FunctionLowering<'_, '_, '_> {
    fn lower_body(mut self) -> CgResult<()> {
        let entry = self.builder.create_block();
        self.builder.append_block_params_for_function_params(entry);
        self.switch_to_block(entry);
        self.builder.seal_block(entry);

        for local in &self.function.locals {
            let size = local.ty.size().max(1) as u32;
            let align_shift = local.ty.align().max(1).trailing_zeros() as u8;
            let slot = self
                .builder
                .create_sized_stack_slot(StackSlotData::new(StackSlotKind::ExplicitSlot, size, align_shift));
            self.slots.push(slot);
        }

        let incoming = self.builder.block_params(entry).to_vec();
        for (local, value) in self.function.params.iter().zip(incoming) {
            let slot = self.slot(*local)?;
            self.builder.ins().stack_store(value, slot, 0);
        }

        for stmt in &self.function.body {
            self.stmt(stmt)?;
        }
        if self.block_state != BlockState::Filled {
            // falling off the end; `main` relies on this returning 0
            self.emit_return(None)?;
        }

        self.builder.seal_all_blocks();
        self.builder.finalize();
        Ok(())
    }

    fn slot(&self, local: usize) -> CgResult<StackSlot> {
        self.slots
            .get(local)
            .copied()
            .ok_or_else(|| CodegenError::Internal(format!("unknown local {} in '{}'", local, self.function.name)))
    }

    /// Integer constant of the C type's width
    fn iconst(&mut self, ty: &CType, value: i64) -> Value {
        let clif_ty = value_type(ty);
        let bits = clif_ty.bits();
        let value = if bits < 64 { value & ((1i64 << bits) - 1) } else { value };
        self.builder.ins().iconst(clif_ty, value)
    }

    /// Continue in a block nothing jumps to yet
    fn start_unreachable_block(&mut self) {
        let block = self.builder.create_block();
        self.switch_to_block(block);
    }

    fn switch_to_block(&mut self, block: Block) {
        self.builder.switch_to_block(block);
        self.block_state = BlockState::Empty;
    }

    fn jump_if_open(&mut self, target: Block) {
        if self.block_state != BlockState::Filled {
            self.builder.ins().jump(target, &[]);
            self.block_state = BlockState::Filled;
        }
    }

    fn emit_return(&mut self, value: Option<Value>) -> CgResult<()> {
        let ret = (*self.function.ty.ret).clone();
        match value {
            Some(v) => {
                self.builder.ins().return_(&[v]);
                self.block_state = BlockState::Filled;
            }
            None if ret.is_void() => {
                self.builder.ins().return_(&[]);
                self.block_state = BlockState::Filled;
            }
            None => {
                let zero = self.iconst(&ret, 0);
                self.builder.ins().return_(&[zero]);
                self.block_state = BlockState::Filled;
            }
        }
        Ok(())
    }

    fn stmt(&mut self, stmt: &TStmt) -> CgResult<()> {
        match stmt {
            TStmt::Block(items) => {
                for item in items {
                    self.stmt(item)?;
                }
            }
            TStmt::Expr(e) => {
                self.expr(e)?;
            }
            TStmt::InitLocal { local, zero_fill, items } => self.init_local(*local, *zero_fill, items)?,
            TStmt::If { cond, then, otherwise } => {
                let c = self.rvalue(cond)?;
                let then_block = self.builder.create_block();
                let merge = self.builder.create_block();
                let else_block = match otherwise {
                    Some(_) => self.builder.create_block(),
                    None => merge,
                };
                self.builder.ins().brif(c, then_block, &[], else_block, &[]);
                self.block_state = BlockState::Filled;

                self.switch_to_block(then_block);
                self.stmt(then)?;
                self.jump_if_open(merge);

                if let Some(otherwise) = otherwise {
                    self.switch_to_block(else_block);
                    self.stmt(otherwise)?;
                    self.jump_if_open(merge);
                }
                self.switch_to_block(merge);
            }
            TStmt::While { cond, body } => {
                let header = self.builder.create_block();
                let body_block = self.builder.create_block();
                let exit = self.builder.create_block();
                self.builder.ins().jump(header, &[]);
                self.block_state = BlockState::Filled;

                self.switch_to_block(header);
                let c = self.rvalue(cond)?;
                self.builder.ins().brif(c, body_block, &[], exit, &[]);
                self.block_state = BlockState::Filled;

                self.switch_to_block(body_block);
                self.loop_body(body, exit, header)?;
                self.jump_if_open(header);
                self.switch_to_block(exit);
            }
            TStmt::DoWhile { body, cond } => {
                let body_block = self.builder.create_block();
                let cond_block = self.builder.create_block();
                let exit = self.builder.create_block();
                self.builder.ins().jump(body_block, &[]);
                self.block_state = BlockState::Filled;

                self.switch_to_block(body_block);
                self.loop_body(body, exit, cond_block)?;
                self.jump_if_open(cond_block);

                self.switch_to_block(cond_block);
                let c = self.rvalue(cond)?;
                self.builder.ins().brif(c, body_block, &[], exit, &[]);
                self.block_state = BlockState::Filled;
                self.switch_to_block(exit);
            }
            TStmt::For { init, cond, step, body } => {
                for stmt in init {
                    self.stmt(stmt)?;
                }
                let header = self.builder.create_block();
                let body_block = self.builder.create_block();
                let step_block = self.builder.create_block();
                let exit = self.builder.create_block();
                self.builder.ins().jump(header, &[]);
                self.block_state = BlockState::Filled;

                self.switch_to_block(header);
                match cond {
                    Some(cond) => {
                        let c = self.rvalue(cond)?;
                        self.builder.ins().brif(c, body_block, &[], exit, &[]);
                        self.block_state = BlockState::Filled;
                    }
                    None => {
                        self.builder.ins().jump(body_block, &[]);
                        self.block_state = BlockState::Filled;
                    }
                }

                self.switch_to_block(body_block);
                self.loop_body(body, exit, step_block)?;
                self.jump_if_open(step_block);

                self.switch_to_block(step_block);
                if let Some(step) = step {
                    self.expr(step)?;
                }
                self.builder.ins().jump(header, &[]);
                self.block_state = BlockState::Filled;
                self.switch_to_block(exit);
            }
            TStmt::Switch {
                cond,
                cases,
                has_default,
                body,
            } => self.switch(cond, cases, *has_default, body)?,
            TStmt::Case { index, body } => {
                let block = self
                    .switches
                    .last()
                    .and_then(|s| s.cases.get(*index).copied())
                    .ok_or_else(|| CodegenError::Internal("case label outside of a switch".into()))?;
                self.jump_if_open(block);
                self.switch_to_block(block);
                self.stmt(body)?;
            }
            TStmt::Default(body) => {
                let block = self
                    .switches
                    .last()
                    .and_then(|s| s.default)
                    .ok_or_else(|| CodegenError::Internal("default label outside of a switch".into()))?;
                self.jump_if_open(block);
                self.switch_to_block(block);
                self.stmt(body)?;
            }
            TStmt::Return(value) => {
                let value = match value {
                    Some(e) => self.expr(e)?,
                    None => None,
                };
                self.emit_return(value)?;
                self.start_unreachable_block();
            }
            TStmt::Break => {
                let exit = self
                    .breakables
                    .last()
                    .map(|b| b.exit)
                    .ok_or_else(|| CodegenError::Internal("break outside of a loop or switch".into()))?;
                self.builder.ins().jump(exit, &[]);
                self.block_state = BlockState::Filled;
                self.start_unreachable_block();
            }
            TStmt::Continue => {
                let next = self
                    .breakables
                    .iter()
                    .rev()
                    .find_map(|b| b.next)
                    .ok_or_else(|| CodegenError::Internal("continue outside of a loop".into()))?;
                self.builder.ins().jump(next, &[]);
                self.block_state = BlockState::Filled;
                self.start_unreachable_block();
            }
        }
        Ok(())
    }

    fn loop_body(&mut self, body: &TStmt, exit: Block, next: Block) -> CgResult<()> {
        self.breakables.push(Breakable { exit, next: Some(next) });
        let result = self.stmt(body);
        self.breakables.pop();
        result
    }

    fn switch(&mut self, cond: &TExpr, cases: &[i64], has_default: bool, body: &TStmt) -> CgResult<()> {
        let value = self.rvalue(cond)?;
        let case_blocks: Vec<Block> = cases.iter().map(|_| self.builder.create_block()).collect();
        let default = has_default.then(|| self.builder.create_block());
        let exit = self.builder.create_block();
        trace!("switch with {} cases, default: {}", cases.len(), has_default);

        for (case, block) in cases.iter().zip(&case_blocks) {
            let expected = self.iconst(&cond.ty, *case);
            let hit = self.builder.ins().icmp(IntCC::Equal, value, expected);
            let next = self.builder.create_block();
            self.builder.ins().brif(hit, *block, &[], next, &[]);
            self.block_state = BlockState::Filled;
            self.switch_to_block(next);
        }
        self.builder.ins().jump(default.unwrap_or(exit), &[]);
        self.block_state = BlockState::Filled;

        // statements ahead of the first label are unreachable
        self.start_unreachable_block();
        self.switches.push(SwitchTargets {
            cases: case_blocks,
            default,
        });
        self.breakables.push(Breakable { exit, next: None });
        let result = self.stmt(body);
        self.breakables.pop();
        self.switches.pop();
        result?;

        self.jump_if_open(exit);
        self.switch_to_block(exit);
        Ok(())
    }

    fn init_local(&mut self, local: usize, zero_fill: bool, items: &[(u64, TExpr)]) -> CgResult<()> {
        let slot = self.slot(local)?;
        let base = self.builder.ins().stack_addr(types::I64, slot, 0);
        if zero_fill {
            let ty = &self.function.locals[local].ty;
            let (size, align) = (ty.size(), ty.align().max(1));
            let config = self.ctx.module.target_config();
            self.builder
                .emit_small_memset(config, base, 0, size, align.min(8) as u8, MemFlags::new());
        }
        for (offset, value) in items {
            let v = self.rvalue(value)?;
            self.builder.ins().store(MemFlags::new(), v, base, *offset as i32);
        }
        Ok(())
    }

    fn rvalue(&mut self, e: &TExpr) -> CgResult<Value> {
        self.expr(e)?
            .ok_or_else(|| CodegenError::Internal(format!("void expression of type '{}' used as a value", e.ty)))
    }

    /// Address of an lvalue or function designator
    fn address(&mut self, e: &TExpr) -> CgResult<Value> {
        match &e.kind {
            TExprKind::Local(id) => {
                let slot = self.slot(*id)?;
                Ok(self.builder.ins().stack_addr(types::I64, slot, 0))
            }
            TExprKind::Global(name) => {
                let id = self.ctx.global_id(name)?;
                Ok(self.data_address(id))
            }
            TExprKind::StringLit(index) => {
                let id = self.ctx.data_id(&SymbolTarget::String(*index))?;
                Ok(self.data_address(id))
            }
            TExprKind::Deref(pointer) => self.rvalue(pointer),
            TExprKind::Function(name) | TExprKind::FuncAddr(name) => self.function_address(name),
            other => Err(CodegenError::Internal(format!("cannot take the address of {:?}", other))),
        }
    }

    fn data_address(&mut self, id: DataId) -> Value {
        let gv = self.ctx.module.declare_data_in_func(id, self.builder.func);
        self.builder.ins().symbol_value(types::I64, gv)
    }

    fn function_address(&mut self, name: &str) -> CgResult<Value> {
        let id = self.ctx.function_id(name)?;
        let func_ref = self.ctx.module.declare_func_in_func(id, self.builder.func);
        Ok(self.builder.ins().func_addr(types::I64, func_ref))
    }

    fn load(&mut self, e: &TExpr) -> CgResult<Value> {
        let addr = self.address(e)?;
        if e.ty.is_array() || e.ty.is_function() {
            return Ok(addr);
        }
        Ok(self.builder.ins().load(value_type(&e.ty), MemFlags::new(), addr, 0))
    }

    /// Integer conversion between two scalar types
    fn convert(&mut self, value: Value, from: &CType, to: &CType) -> Value {
        if matches!(to, CType::Bool) {
            if matches!(from, CType::Bool) {
                return value;
            }
            return self.builder.ins().icmp_imm(IntCC::NotEqual, value, 0);
        }
        let (src, dst) = (value_type(from), value_type(to));
        if src == dst {
            value
        } else if dst.bits() > src.bits() {
            if from.is_signed() {
                self.builder.ins().sextend(dst, value)
            } else {
                self.builder.ins().uextend(dst, value)
            }
        } else {
            self.builder.ins().ireduce(dst, value)
        }
    }

    fn arithmetic(&mut self, op: BinOp, lhs: Value, rhs: Value, signed: bool) -> CgResult<Value> {
        let ins = self.builder.ins();
        Ok(match op {
            BinOp::Add => ins.iadd(lhs, rhs),
            BinOp::Sub => ins.isub(lhs, rhs),
            BinOp::Mul => ins.imul(lhs, rhs),
            BinOp::Div if signed => ins.sdiv(lhs, rhs),
            BinOp::Div => ins.udiv(lhs, rhs),
            BinOp::Rem if signed => ins.srem(lhs, rhs),
            BinOp::Rem => ins.urem(lhs, rhs),
            BinOp::Shl => ins.ishl(lhs, rhs),
            BinOp::Shr if signed => ins.sshr(lhs, rhs),
            BinOp::Shr => ins.ushr(lhs, rhs),
            BinOp::And => ins.band(lhs, rhs),
            BinOp::Or => ins.bor(lhs, rhs),
            BinOp::Xor => ins.bxor(lhs, rhs),
            cmp => return Err(CodegenError::Internal(format!("{:?} is not an arithmetic operator", cmp))),
        })
    }

    fn expr(&mut self, e: &TExpr) -> CgResult<Option<Value>> {
        let value = match &e.kind {
            TExprKind::Const(v) => self.iconst(&e.ty, *v),
            TExprKind::Local(_) | TExprKind::Global(_) | TExprKind::StringLit(_) | TExprKind::Deref(_) => {
                self.load(e)?
            }
            TExprKind::Function(name) | TExprKind::FuncAddr(name) => self.function_address(name)?,
            TExprKind::AddrOf(inner) => self.address(inner)?,
            TExprKind::Cast(inner) => {
                let value = self.expr(inner)?;
                if e.ty.is_void() {
                    return Ok(None);
                }
                let value = value.ok_or_else(|| CodegenError::Internal("cast of a void expression".into()))?;
                self.convert(value, &inner.ty, &e.ty)
            }
            TExprKind::Unary(op, operand) => {
                let v = self.rvalue(operand)?;
                match op {
                    UnOp::Neg => self.builder.ins().ineg(v),
                    UnOp::BitNot => self.builder.ins().bnot(v),
                    UnOp::LogNot => {
                        let zero = self.builder.ins().icmp_imm(IntCC::Equal, v, 0);
                        self.builder.ins().uextend(value_type(&e.ty), zero)
                    }
                }
            }
            TExprKind::Binary(op, lhs, rhs) => {
                let l = self.rvalue(lhs)?;
                let r = self.rvalue(rhs)?;
                if op.is_comparison() {
                    let flag = self.builder.ins().icmp(int_cc(*op, lhs.ty.is_signed()), l, r);
                    self.builder.ins().uextend(value_type(&e.ty), flag)
                } else {
                    self.arithmetic(*op, l, r, lhs.ty.is_signed())?
                }
            }
            TExprKind::Logical { and, lhs, rhs } => self.logical(*and, lhs, rhs)?,
            TExprKind::Conditional(cond, a, b) => return self.conditional(&e.ty, cond, a, b),
            TExprKind::Assign(target, value) => {
                let v = self.rvalue(value)?;
                let addr = self.address(target)?;
                self.builder.ins().store(MemFlags::new(), v, addr, 0);
                v
            }
            TExprKind::CompoundAssign {
                op,
                target,
                value,
                op_ty,
            } => {
                let addr = self.address(target)?;
                let old = self.builder.ins().load(value_type(&target.ty), MemFlags::new(), addr, 0);
                let widened = self.convert(old, &target.ty, op_ty);
                let v = self.rvalue(value)?;
                let result = self.arithmetic(*op, widened, v, op_ty.is_signed())?;
                let narrowed = self.convert(result, op_ty, &target.ty);
                self.builder.ins().store(MemFlags::new(), narrowed, addr, 0);
                narrowed
            }
            TExprKind::IncDec { target, delta, prefix } => {
                let addr = self.address(target)?;
                let old = self.builder.ins().load(value_type(&target.ty), MemFlags::new(), addr, 0);
                let new = if matches!(target.ty, CType::Bool) {
                    let widened = self.builder.ins().uextend(types::I32, old);
                    let step = self.builder.ins().iconst(types::I32, *delta);
                    let sum = self.builder.ins().iadd(widened, step);
                    self.builder.ins().icmp_imm(IntCC::NotEqual, sum, 0)
                } else {
                    let step = self.iconst(&target.ty, *delta);
                    self.builder.ins().iadd(old, step)
                };
                self.builder.ins().store(MemFlags::new(), new, addr, 0);
                if *prefix { new } else { old }
            }
            TExprKind::Call {
                callee,
                args,
                fixed_signature,
            } => return self.call(&e.ty, callee, args, *fixed_signature),
            TExprKind::Comma(first, second) => {
                self.expr(first)?;
                return self.expr(second);
            }
        };
        Ok(Some(value))
    }

    fn logical(&mut self, and: bool, lhs: &TExpr, rhs: &TExpr) -> CgResult<Value> {
        let l = self.rvalue(lhs)?;
        let rhs_block = self.builder.create_block();
        let merge = self.builder.create_block();
        let result = self.builder.append_block_param(merge, types::I32);

        let short_circuit = self.builder.ins().iconst(types::I32, if and { 0 } else { 1 });
        if and {
            self.builder.ins().brif(l, rhs_block, &[], merge, &[short_circuit]);
            self.block_state = BlockState::Filled;
        } else {
            self.builder.ins().brif(l, merge, &[short_circuit], rhs_block, &[]);
            self.block_state = BlockState::Filled;
        }

        self.switch_to_block(rhs_block);
        let r = self.rvalue(rhs)?;
        let truth = self.builder.ins().icmp_imm(IntCC::NotEqual, r, 0);
        let truth = self.builder.ins().uextend(types::I32, truth);
        self.builder.ins().jump(merge, &[truth]);
        self.block_state = BlockState::Filled;

        self.switch_to_block(merge);
        Ok(result)
    }

    fn conditional(&mut self, ty: &CType, cond: &TExpr, a: &TExpr, b: &TExpr) -> CgResult<Option<Value>> {
        let c = self.rvalue(cond)?;
        let then_block = self.builder.create_block();
        let else_block = self.builder.create_block();
        let merge = self.builder.create_block();
        let result = (!ty.is_void()).then(|| self.builder.append_block_param(merge, value_type(ty)));
        self.builder.ins().brif(c, then_block, &[], else_block, &[]);
        self.block_state = BlockState::Filled;

        for (block, arm) in [(then_block, a), (else_block, b)] {
            self.switch_to_block(block);
            let v = self.expr(arm)?;
            match (result, v) {
                (Some(_), Some(v)) => self.builder.ins().jump(merge, &[v]),
                (None, _) => self.builder.ins().jump(merge, &[]),
                (Some(_), None) => {
                    return Err(CodegenError::Internal("void operand in a valued conditional".into()));
                }
            };
            self.block_state = BlockState::Filled;
        }

        self.switch_to_block(merge);
        Ok(result)
    }

    fn call(
        &mut self,
        ret: &CType,
        callee: &Callee,
        args: &[TExpr],
        fixed_signature: bool,
    ) -> CgResult<Option<Value>> {
        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            values.push(self.rvalue(arg)?);
        }

        let inst = match callee {
            Callee::Direct(name) if fixed_signature => {
                let id = self.ctx.function_id(name)?;
                let func_ref = self.ctx.module.declare_func_in_func(id, self.builder.func);
                self.builder.ins().call(func_ref, &values)
            }
            _ => {
                let (addr, variadic) = match callee {
                    Callee::Direct(name) => {
                        let variadic = self.ctx.program.function_decl(name).is_some_and(|d| d.ty.variadic);
                        (self.function_address(name)?, variadic)
                    }
                    Callee::Indirect(pointer) => {
                        let variadic = pointer.ty.as_function().is_some_and(|f| f.variadic);
                        (self.rvalue(pointer)?, variadic)
                    }
                };
                // the call site decides the signature for variadic and unprototyped callees
                let mut sig = self.ctx.module.make_signature();
                sig.params.extend(args.iter().map(|a| abi_param(&a.ty)));
                if !ret.is_void() {
                    sig.returns.push(abi_param(ret));
                }
                let addr = if variadic { self.variadic_target(addr)? } else { addr };
                let sig_ref = self.builder.import_signature(sig);
                self.builder.ins().call_indirect(sig_ref, addr, &values)
            }
        };

        if ret.is_void() {
            return Ok(None);
        }
        let result = self.builder.inst_results(inst).first().copied();
        result
            .map(Some)
            .ok_or_else(|| CodegenError::Internal("call produced no value".into()))
    }

    /// Route a variadic callee through `__cendol_set_al` on x86_64 SysV
    fn variadic_target(&mut self, addr: Value) -> CgResult<Value> {
        if self.ctx.triple.architecture != Architecture::X86_64
            || self.builder.func.signature.call_conv != CallConv::SystemV
        {
            return Ok(addr);
        }
        let set_al = self.ctx.set_al_func()?;
        let local_set_al = self.ctx.module.declare_func_in_func(set_al, self.builder.func);
        // no floating point arguments exist, so no vector registers are used
        let count = self.builder.ins().iconst(types::I64, 0);
        let inst = self.builder.ins().call(local_set_al, &[count, addr]);
        self.builder
            .inst_results(inst)
            .get(1)
            .copied()
            .ok_or_else(|| CodegenError::Internal("__cendol_set_al returned no address".into()))
    }
}
