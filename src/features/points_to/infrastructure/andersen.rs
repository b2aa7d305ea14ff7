//! Inclusion-based reference engine for the points-to port.
//!
//! Constraint vocabulary follows Andersen's formulation: addr-of seeds,
//! copy edges, and complex load/store constraints re-evaluated as
//! points-to sets grow. Nodes are (context, value) pairs plus one summary
//! field node per abstract object. Contexts are origin-sensitive and the
//! call graph is built on the fly; indirect call sites are resolved in
//! fixpoint rounds as function objects reach their callee operand.

use super::heap_model::{infer_alloc_type, is_heap_alloc};
use crate::features::points_to::domain::call_graph::CallGraph;
use crate::features::points_to::domain::context::{ContextTable, CtxId, ROOT_CTX};
use crate::features::points_to::domain::object::{MemoryObject, ObjKind, ObjectId};
use crate::features::points_to::ports::{CallNodeRef, PointsToEngine, PtaError};
use crate::features::recognizer::{classify, FuncEffect};
use crate::shared::models::{
    CallTarget, FuncId, InstId, InstKind, Module, Terminator, Value,
};
use crate::DEBUG_PTA;
use rustc_hash::{FxHashMap, FxHashSet};
use std::cell::RefCell;
use std::collections::BTreeSet;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
enum PtNode {
    Val { ctx: CtxId, value: Value },
    /// Field summary of an abstract object (field-insensitive).
    ObjField(ObjectId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SiteKind {
    PlainCall,
    PthreadCreate,
    OmpFork,
    OmpTask,
}

#[derive(Debug, Clone, Copy)]
struct IndirectSite {
    ctx: CtxId,
    inst: InstId,
    callee: Value,
    kind: SiteKind,
}

#[derive(Debug, Default)]
pub struct AndersenEngine {
    ctxs: RefCell<ContextTable>,
    origin_sites: FxHashSet<InstId>,

    objects: Vec<MemoryObject>,
    obj_index: FxHashMap<(CtxId, ObjKind), ObjectId>,
    global_objs: FxHashMap<u32, ObjectId>,
    func_objs: FxHashMap<FuncId, ObjectId>,

    pts: FxHashMap<PtNode, BTreeSet<ObjectId>>,
    copy_edges: FxHashMap<PtNode, BTreeSet<PtNode>>,
    loads_from: FxHashMap<PtNode, Vec<PtNode>>,
    stores_to: FxHashMap<PtNode, Vec<PtNode>>,

    call_graph: CallGraph,
    visited: FxHashSet<(CtxId, FuncId)>,
    entry: Option<CallNodeRef>,
    indirect_sites: Vec<IndirectSite>,
    indirect_resolved: FxHashMap<(CtxId, InstId), BTreeSet<CallNodeRef>>,
}

impl AndersenEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn evolve(&self, parent: CtxId, site: InstId) -> CtxId {
        self.ctxs.borrow_mut().evolve(parent, site)
    }

    fn intern_obj(
        &mut self,
        ctx: CtxId,
        kind: ObjKind,
        ty: Option<crate::shared::models::TypeDesc>,
        thread_local: bool,
    ) -> ObjectId {
        if let Some(&existing) = self.obj_index.get(&(ctx, kind)) {
            return existing;
        }
        let id = self.objects.len() as ObjectId;
        self.objects.push(MemoryObject {
            id,
            ctx,
            kind,
            ty,
            thread_local,
        });
        self.obj_index.insert((ctx, kind), id);
        id
    }

    fn val_node(&mut self, ctx: CtxId, value: Value) -> PtNode {
        let node = PtNode::Val { ctx, value };
        // Globals and functions are their own address.
        match value {
            Value::Global(g) => {
                let obj = self.global_objs[&g];
                self.pts.entry(node).or_default().insert(obj);
            }
            Value::Function(f) => {
                let obj = self.func_objs[&f];
                self.pts.entry(node).or_default().insert(obj);
            }
            _ => {}
        }
        node
    }

    fn addr_of(&mut self, node: PtNode, obj: ObjectId) {
        self.pts.entry(node).or_default().insert(obj);
    }

    fn add_copy(&mut self, src: PtNode, dst: PtNode) {
        self.copy_edges.entry(src).or_default().insert(dst);
    }

    fn add_load(&mut self, ptr: PtNode, dst: PtNode) {
        self.loads_from.entry(ptr).or_default().push(dst);
    }

    fn add_store(&mut self, ptr: PtNode, src: PtNode) {
        self.stores_to.entry(ptr).or_default().push(src);
    }

    /// Task-entry function recorded at the paired task-alloc site.
    fn task_entry_func(module: &Module, task_struct: Value) -> Option<FuncId> {
        let alloc = module.strip_casts(task_struct).as_inst()?;
        let inst = module.inst(alloc)?;
        let (CallTarget::Direct(callee), args) = inst.as_call()? else {
            return None;
        };
        if classify(&module.function(*callee).name) != FuncEffect::OmpTaskAlloc {
            return None;
        }
        let entry = module.strip_casts(*args.get(5)?);
        entry.as_function()
    }

    /// Signature compatibility of an indirectly resolved thread entry.
    fn entry_compatible(module: &Module, kind: SiteKind, func: FuncId) -> bool {
        let params = module.function(func).params.len();
        match kind {
            SiteKind::PthreadCreate => params == 1,
            SiteKind::OmpFork => params >= 2,
            _ => true,
        }
    }

    fn model_heap_alloc(&mut self, module: &Module, ctx: CtxId, inst: InstId, name: &str) {
        let ty = infer_alloc_type(module, inst, name);
        if ty.is_none() {
            debug!(call = name, inst, "untyped heap allocation");
        }
        let result = self.val_node(ctx, Value::Inst(inst));
        if name == "__kmpc_omp_task_alloc" {
            // Two objects: the task struct itself and the shared-data
            // object it contains; the returned pointer points to the
            // task, which in turn points to the shared object.
            let task = self.intern_obj(ctx, ObjKind::Heap(inst), ty, false);
            let shared = self.intern_obj(ctx, ObjKind::TaskShared(inst), None, false);
            self.addr_of(result, task);
            self.addr_of(PtNode::ObjField(task), shared);
        } else {
            let obj = self.intern_obj(ctx, ObjKind::Heap(inst), ty, false);
            self.addr_of(result, obj);
        }
    }

    /// Copy pointer-typed actuals into formals and link return values.
    fn link_plain_call(
        &mut self,
        module: &Module,
        caller_ctx: CtxId,
        callee_ctx: CtxId,
        call_inst: InstId,
        callee: FuncId,
        args: &[Value],
    ) {
        let fdef = module.function(callee);
        for (i, param) in fdef.params.iter().enumerate() {
            if !param.ty.is_ptr() {
                continue;
            }
            if let Some(actual) = args.get(i) {
                let src = self.val_node(caller_ctx, *actual);
                let dst = self.val_node(
                    callee_ctx,
                    Value::Arg {
                        func: callee,
                        index: i as u32,
                    },
                );
                self.add_copy(src, dst);
            }
        }
        for block in &fdef.blocks {
            if let Terminator::Ret(Some(v)) = &block.term {
                let src = self.val_node(callee_ctx, *v);
                let dst = self.val_node(caller_ctx, Value::Inst(call_inst));
                self.add_copy(src, dst);
            }
        }
    }

    /// pthread_create passes a single `void *`: link the 4th caller
    /// argument to the entry function's 1st formal.
    fn link_pthread_entry(&mut self, ctx: CtxId, child_ctx: CtxId, args: &[Value], entry: FuncId) {
        if let Some(actual) = args.get(3) {
            let src = self.val_node(ctx, *actual);
            let dst = self.val_node(
                child_ctx,
                Value::Arg {
                    func: entry,
                    index: 0,
                },
            );
            self.add_copy(src, dst);
        }
    }

    /// OpenMP forks pass shared values by pointer: caller argument (i+3)
    /// flows to outlined formal (i+2), pointer-typed formals only.
    fn link_omp_outlined(
        &mut self,
        module: &Module,
        ctx: CtxId,
        child_ctx: CtxId,
        args: &[Value],
        outlined: FuncId,
    ) {
        let fdef = module.function(outlined);
        for (formal_index, param) in fdef.params.iter().enumerate().skip(2) {
            if !param.ty.is_ptr() {
                continue;
            }
            if let Some(actual) = args.get(formal_index + 1) {
                let src = self.val_node(ctx, *actual);
                let dst = self.val_node(
                    child_ctx,
                    Value::Arg {
                        func: outlined,
                        index: formal_index as u32,
                    },
                );
                self.add_copy(src, dst);
            }
        }
    }

    /// `__kmpc_omp_task(loc, gtid, task)` links the task struct to the
    /// task function's 2nd formal.
    fn link_task_entry(&mut self, ctx: CtxId, child_ctx: CtxId, args: &[Value], entry: FuncId) {
        if let Some(actual) = args.get(2).or_else(|| args.last()) {
            let src = self.val_node(ctx, *actual);
            let dst = self.val_node(
                child_ctx,
                Value::Arg {
                    func: entry,
                    index: 1,
                },
            );
            self.add_copy(src, dst);
        }
    }

    fn process_direct_call(
        &mut self,
        module: &Module,
        ctx: CtxId,
        caller: FuncId,
        inst: InstId,
        callee: FuncId,
        args: &[Value],
    ) {
        let name = module.function(callee).name.clone();
        let effect = classify(&name);

        if is_heap_alloc(&name) {
            self.model_heap_alloc(module, ctx, inst, &name);
        }

        match effect {
            FuncEffect::PthreadCreate => {
                self.origin_sites.insert(inst);
                // The opaque thread id written through the handle
                // argument; joins intersect against it.
                let handle_obj = self.intern_obj(ctx, ObjKind::ThreadHandle(inst), None, false);
                let result = self.val_node(ctx, Value::Inst(inst));
                self.addr_of(result, handle_obj);
                if let Some(handle_ptr) = args.first() {
                    let ptr = self.val_node(ctx, *handle_ptr);
                    self.add_store(ptr, result);
                }

                let Some(entry_operand) = args.get(2) else {
                    warn!(inst, "pthread_create without entry operand");
                    return;
                };
                let child_ctx = self.evolve(ctx, inst);
                match module.strip_casts(*entry_operand) {
                    Value::Function(f) => {
                        self.link_pthread_entry(ctx, child_ctx, args, f);
                        self.process_function(module, child_ctx, f);
                        self.call_graph.add_call((ctx, caller), (child_ctx, f), inst);
                    }
                    Value::Inst(entry_inst) => {
                        // Keep scopes aligned: no context evolution when
                        // the entry is an instruction of the caller side.
                        if let Some(f) = module.containing_function(entry_inst) {
                            self.process_function(module, ctx, f);
                            self.call_graph.add_call((ctx, caller), (ctx, f), inst);
                        }
                    }
                    other => {
                        self.indirect_sites.push(IndirectSite {
                            ctx,
                            inst,
                            callee: other,
                            kind: SiteKind::PthreadCreate,
                        });
                    }
                }
            }
            FuncEffect::OmpFork | FuncEffect::OmpForkTeams => {
                self.origin_sites.insert(inst);
                let Some(entry_operand) = args.get(2) else {
                    warn!(inst, "OpenMP fork without outlined operand");
                    return;
                };
                let child_ctx = self.evolve(ctx, inst);
                match module.strip_casts(*entry_operand) {
                    Value::Function(f) => {
                        self.link_omp_outlined(module, ctx, child_ctx, args, f);
                        self.process_function(module, child_ctx, f);
                        self.call_graph.add_call((ctx, caller), (child_ctx, f), inst);
                    }
                    Value::Inst(entry_inst) => {
                        if let Some(f) = module.containing_function(entry_inst) {
                            self.process_function(module, ctx, f);
                            self.call_graph.add_call((ctx, caller), (ctx, f), inst);
                        }
                    }
                    other => {
                        self.indirect_sites.push(IndirectSite {
                            ctx,
                            inst,
                            callee: other,
                            kind: SiteKind::OmpFork,
                        });
                    }
                }
            }
            FuncEffect::OmpTaskFork => {
                self.origin_sites.insert(inst);
                let task_struct = args.last().copied().unwrap_or(Value::Null);
                let child_ctx = self.evolve(ctx, inst);
                match Self::task_entry_func(module, task_struct) {
                    Some(f) => {
                        self.link_task_entry(ctx, child_ctx, args, f);
                        self.process_function(module, child_ctx, f);
                        self.call_graph.add_call((ctx, caller), (child_ctx, f), inst);
                    }
                    None => {
                        self.indirect_sites.push(IndirectSite {
                            ctx,
                            inst,
                            callee: task_struct,
                            kind: SiteKind::OmpTask,
                        });
                    }
                }
            }
            FuncEffect::OmpTaskAlloc => {
                self.origin_sites.insert(inst);
            }
            FuncEffect::Opaque => {
                if module.function(callee).is_external() {
                    // Model imprecision: external opaque calls neither
                    // create nor move pointers.
                    return;
                }
                let child_ctx = ctx; // ordinary calls do not grow the context
                self.link_plain_call(module, ctx, child_ctx, inst, callee, args);
                self.process_function(module, child_ctx, callee);
                self.call_graph.add_call((ctx, caller), (child_ctx, callee), inst);
            }
            // Synchronization and no-effect calls move no pointers.
            _ => {}
        }
    }

    fn process_function(&mut self, module: &Module, ctx: CtxId, func: FuncId) {
        if !self.visited.insert((ctx, func)) {
            return;
        }
        self.call_graph.ensure_node(ctx, func);
        let fdef = module.function(func);
        if fdef.is_external() {
            return;
        }
        if *DEBUG_PTA {
            debug!(ctx, func = %fdef.name, "pta: expanding function");
        }

        for block in &fdef.blocks {
            for inst in &block.insts {
                match &inst.kind {
                    InstKind::Alloca { ty } => {
                        let obj =
                            self.intern_obj(ctx, ObjKind::Stack(inst.id), Some(ty.clone()), false);
                        let node = self.val_node(ctx, inst.result());
                        self.addr_of(node, obj);
                    }
                    InstKind::Load { ptr, .. } => {
                        let ptr = self.val_node(ctx, *ptr);
                        let dst = self.val_node(ctx, inst.result());
                        self.add_load(ptr, dst);
                    }
                    InstKind::Store { ptr, value, .. } => {
                        let ptr = self.val_node(ctx, *ptr);
                        let src = self.val_node(ctx, *value);
                        self.add_store(ptr, src);
                    }
                    InstKind::BitCast { value, .. } => {
                        let src = self.val_node(ctx, *value);
                        let dst = self.val_node(ctx, inst.result());
                        self.add_copy(src, dst);
                    }
                    InstKind::Gep { base } => {
                        let src = self.val_node(ctx, *base);
                        let dst = self.val_node(ctx, inst.result());
                        self.add_copy(src, dst);
                    }
                    InstKind::Phi { incoming } => {
                        for (_, value) in incoming {
                            let src = self.val_node(ctx, *value);
                            let dst = self.val_node(ctx, inst.result());
                            self.add_copy(src, dst);
                        }
                    }
                    InstKind::Call {
                        target: CallTarget::Indirect(callee),
                        ..
                    } => {
                        let _ = self.val_node(ctx, *callee);
                        self.indirect_sites.push(IndirectSite {
                            ctx,
                            inst: inst.id,
                            callee: *callee,
                            kind: SiteKind::PlainCall,
                        });
                    }
                    InstKind::Call {
                        target: CallTarget::Direct(callee),
                        args,
                    } => {
                        self.process_direct_call(module, ctx, func, inst.id, *callee, args);
                    }
                    InstKind::CmpEq { .. } | InstKind::Other { .. } => {}
                }
            }
        }
    }

    /// Propagate until no points-to set grows.
    fn solve(&mut self) {
        loop {
            let mut changed = false;

            // Complex constraints induce copy edges through object fields.
            let mut induced: Vec<(PtNode, PtNode)> = Vec::new();
            for (ptr, dsts) in &self.loads_from {
                if let Some(objs) = self.pts.get(ptr) {
                    for &obj in objs {
                        for &dst in dsts {
                            induced.push((PtNode::ObjField(obj), dst));
                        }
                    }
                }
            }
            for (ptr, srcs) in &self.stores_to {
                if let Some(objs) = self.pts.get(ptr) {
                    for &obj in objs {
                        for &src in srcs {
                            induced.push((src, PtNode::ObjField(obj)));
                        }
                    }
                }
            }
            for (src, dst) in induced {
                changed |= self.copy_edges.entry(src).or_default().insert(dst);
            }

            // Propagate along copy edges.
            let edges: Vec<(PtNode, Vec<PtNode>)> = self
                .copy_edges
                .iter()
                .map(|(src, dsts)| (*src, dsts.iter().copied().collect()))
                .collect();
            for (src, dsts) in edges {
                let src_pts = match self.pts.get(&src) {
                    Some(p) if !p.is_empty() => p.clone(),
                    _ => continue,
                };
                for dst in dsts {
                    let dst_pts = self.pts.entry(dst).or_default();
                    let before = dst_pts.len();
                    dst_pts.extend(src_pts.iter().copied());
                    changed |= dst_pts.len() != before;
                }
            }

            if !changed {
                break;
            }
        }
    }

    /// Resolve indirect call sites against the current solution; returns
    /// true if any new callee was linked.
    fn resolve_indirect_round(&mut self, module: &Module) -> bool {
        let mut progressed = false;
        let sites = self.indirect_sites.clone();
        for site in sites {
            let node = PtNode::Val {
                ctx: site.ctx,
                value: site.callee,
            };
            let objs = self.pts.get(&node).cloned().unwrap_or_default();
            for obj in objs {
                let Some(func) = self.objects[obj as usize].as_function() else {
                    continue;
                };
                if !Self::entry_compatible(module, site.kind, func) {
                    continue;
                }
                let child_ctx = match site.kind {
                    SiteKind::PlainCall => site.ctx,
                    _ => self.evolve(site.ctx, site.inst),
                };
                let node_ref = CallNodeRef {
                    ctx: child_ctx,
                    func,
                };
                let newly = self
                    .indirect_resolved
                    .entry((site.ctx, site.inst))
                    .or_default()
                    .insert(node_ref);
                if !newly {
                    continue;
                }
                progressed = true;
                if *DEBUG_PTA {
                    debug!(site = site.inst, func, "pta: resolved indirect callee");
                }

                let args: Vec<Value> = module
                    .inst(site.inst)
                    .and_then(|i| i.as_call().map(|(_, a)| a.to_vec()))
                    .unwrap_or_default();
                match site.kind {
                    SiteKind::PlainCall => {
                        self.link_plain_call(module, site.ctx, child_ctx, site.inst, func, &args)
                    }
                    SiteKind::PthreadCreate => {
                        self.link_pthread_entry(site.ctx, child_ctx, &args, func)
                    }
                    SiteKind::OmpFork => {
                        self.link_omp_outlined(module, site.ctx, child_ctx, &args, func)
                    }
                    SiteKind::OmpTask => self.link_task_entry(site.ctx, child_ctx, &args, func),
                }
                self.process_function(module, child_ctx, func);
                if let Some(caller) = module.containing_function(site.inst) {
                    self.call_graph
                        .add_call((site.ctx, caller), (child_ctx, func), site.inst);
                }
            }
        }
        progressed
    }
}

impl PointsToEngine for AndersenEngine {
    fn analyze(&mut self, module: &Module, entry_name: &str) -> Result<(), PtaError> {
        let entry = module
            .function_by_name(entry_name)
            .ok_or_else(|| PtaError::EntryNotFound(entry_name.to_string()))?;

        for global in &module.globals {
            let obj = self.intern_obj(
                ROOT_CTX,
                ObjKind::Global(global.id),
                Some(global.ty.clone()),
                global.thread_local,
            );
            self.global_objs.insert(global.id, obj);
        }
        for func in &module.functions {
            let obj = self.intern_obj(ROOT_CTX, ObjKind::Function(func.id), None, false);
            self.func_objs.insert(func.id, obj);
        }

        self.entry = Some(CallNodeRef {
            ctx: ROOT_CTX,
            func: entry,
        });
        self.process_function(module, ROOT_CTX, entry);

        loop {
            self.solve();
            if !self.resolve_indirect_round(module) {
                break;
            }
        }

        debug!(
            nodes = self.call_graph.node_count(),
            edges = self.call_graph.edge_count(),
            objects = self.objects.len(),
            contexts = self.ctxs.borrow().len(),
            "pta: analysis complete"
        );
        Ok(())
    }

    fn entry_node(&self) -> CallNodeRef {
        self.entry.expect("analyze() must run before queries")
    }

    fn points_to(&self, ctx: CtxId, value: Value) -> Vec<ObjectId> {
        match value {
            Value::Global(g) => self.global_objs.get(&g).copied().into_iter().collect(),
            Value::Function(f) => self.func_objs.get(&f).copied().into_iter().collect(),
            _ => self
                .pts
                .get(&PtNode::Val { ctx, value })
                .map(|set| set.iter().copied().collect())
                .unwrap_or_default(),
        }
    }

    fn object(&self, id: ObjectId) -> &MemoryObject {
        &self.objects[id as usize]
    }

    fn direct_node(&self, ctx: CtxId, func: FuncId) -> Option<CallNodeRef> {
        self.visited
            .contains(&(ctx, func))
            .then_some(CallNodeRef { ctx, func })
    }

    fn indirect_callees(&self, ctx: CtxId, call: InstId) -> Vec<CallNodeRef> {
        self.indirect_resolved
            .get(&(ctx, call))
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    fn context_evolve(&self, parent: CtxId, callsite: InstId) -> CtxId {
        if self.origin_sites.contains(&callsite) {
            self.evolve(parent, callsite)
        } else {
            parent
        }
    }

    fn is_origin(&self, callsite: InstId) -> bool {
        self.origin_sites.contains(&callsite)
    }
}
