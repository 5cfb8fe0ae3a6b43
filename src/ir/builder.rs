use crate::ir::{
    BinaryOp, BlockId, CompareOp, FieldRef, GuardKind, InstId, InstKind, MethodBody, MethodRef,
    SsaType, TypeRef, UnaryOp, Value, VariableId,
};

/// Appends instructions to one block of a [`MethodBody`].
///
/// Result types are derived from the operation where the operation determines them
/// (comparisons, calls, field loads); otherwise the caller passes them.
pub struct Builder<'a> {
    body: &'a mut MethodBody,
    block: BlockId,
}

impl<'a> Builder<'a> {
    /// Creates a builder positioned at the end of `block`
    pub fn new(body: &'a mut MethodBody, block: BlockId) -> Self {
        Builder { body, block }
    }

    /// The block instructions are appended to
    #[must_use]
    pub fn block(&self) -> BlockId {
        self.block
    }

    /// Moves the insertion point to the end of `block`
    pub fn switch_to(&mut self, block: BlockId) {
        self.block = block;
    }

    fn push(&mut self, kind: InstKind, operands: Vec<Value>, ty: SsaType) -> InstId {
        self.body.append(self.block, kind, operands, ty)
    }

    /// `left op right`
    pub fn binary(&mut self, op: BinaryOp, left: Value, right: Value, ty: SsaType) -> InstId {
        self.push(InstKind::Binary(op), vec![left, right], ty)
    }

    /// `op operand`
    pub fn unary(&mut self, op: UnaryOp, operand: Value, ty: SsaType) -> InstId {
        self.push(InstKind::Unary(op), vec![operand], ty)
    }

    /// `left op right`, producing a `bool`
    pub fn compare(&mut self, op: CompareOp, left: Value, right: Value) -> InstId {
        self.push(InstKind::Compare(op), vec![left, right], SsaType::Bool)
    }

    /// Numeric conversion
    pub fn convert(&mut self, operand: Value, to: SsaType, checked: bool) -> InstId {
        let source_unsigned = self.body.value_type(&operand).is_unsigned();
        self.push(
            InstKind::Convert {
                to: to.clone(),
                checked,
                source_unsigned,
            },
            vec![operand],
            to,
        )
    }

    /// Direct call; for instance methods `args[0]` is the receiver
    pub fn call(&mut self, method: MethodRef, args: &[Value]) -> InstId {
        let ty = method.return_type.clone();
        self.push(
            InstKind::Call {
                method,
                is_virtual: false,
            },
            args.to_vec(),
            ty,
        )
    }

    /// Virtual call; `args[0]` is the receiver
    pub fn callvirt(&mut self, method: MethodRef, args: &[Value]) -> InstId {
        let ty = method.return_type.clone();
        self.push(
            InstKind::Call {
                method,
                is_virtual: true,
            },
            args.to_vec(),
            ty,
        )
    }

    /// Object construction
    pub fn newobj(&mut self, ctor: MethodRef, args: &[Value], ty: SsaType) -> InstId {
        self.push(InstKind::NewObj { ctor }, args.to_vec(), ty)
    }

    /// Field load, `object` is `None` for static fields
    pub fn load_field(&mut self, field: FieldRef, object: Option<Value>) -> InstId {
        let ty = field.field_type.clone();
        self.push(InstKind::LoadField(field), object.into_iter().collect(), ty)
    }

    /// Field store, `object` is `None` for static fields
    pub fn store_field(&mut self, field: FieldRef, object: Option<Value>, value: Value) -> InstId {
        let mut operands: Vec<Value> = object.into_iter().collect();
        operands.push(value);
        self.push(InstKind::StoreField(field), operands, SsaType::Void)
    }

    /// Field address
    pub fn field_addr(&mut self, field: FieldRef, object: Option<Value>) -> InstId {
        let ty = SsaType::ByRef(Box::new(field.field_type.clone()));
        self.push(InstKind::FieldAddr(field), object.into_iter().collect(), ty)
    }

    /// One-dimensional array allocation
    pub fn new_array(&mut self, elem: TypeRef, elem_ty: SsaType, length: Value) -> InstId {
        self.push(
            InstKind::NewArray(elem),
            vec![length],
            SsaType::Array(Box::new(elem_ty)),
        )
    }

    /// Array length as `int32`
    pub fn array_length(&mut self, array: Value) -> InstId {
        self.push(InstKind::ArrayLength, vec![array], SsaType::I32)
    }

    /// `array[index]`
    pub fn load_element(&mut self, elem_ty: SsaType, array: Value, index: Value) -> InstId {
        self.push(
            InstKind::LoadElement(elem_ty.clone()),
            vec![array, index],
            elem_ty,
        )
    }

    /// `array[index] = value`
    pub fn store_element(
        &mut self,
        elem_ty: SsaType,
        array: Value,
        index: Value,
        value: Value,
    ) -> InstId {
        self.push(
            InstKind::StoreElement(elem_ty),
            vec![array, index, value],
            SsaType::Void,
        )
    }

    /// `&array[index]`
    pub fn element_addr(&mut self, elem_ty: SsaType, array: Value, index: Value) -> InstId {
        let ty = SsaType::ByRef(Box::new(elem_ty.clone()));
        self.push(InstKind::ElementAddr(elem_ty), vec![array, index], ty)
    }

    /// Boxes a value type
    pub fn box_value(&mut self, ty: TypeRef, value: Value) -> InstId {
        self.push(InstKind::Box(ty), vec![value], SsaType::Object)
    }

    /// Unboxes into `result`
    pub fn unbox_any(&mut self, ty: TypeRef, value: Value, result: SsaType) -> InstId {
        self.push(InstKind::UnboxAny(ty), vec![value], result)
    }

    /// Checked cast
    pub fn cast_class(&mut self, ty: TypeRef, value: Value) -> InstId {
        self.push(InstKind::CastClass(ty), vec![value], SsaType::Class(ty))
    }

    /// Type test
    pub fn is_inst(&mut self, ty: TypeRef, value: Value) -> InstId {
        self.push(InstKind::IsInst(ty), vec![value], SsaType::Class(ty))
    }

    /// Reads an address-exposed variable
    pub fn load_var(&mut self, var: VariableId) -> InstId {
        let ty = self.body.variables()[var.0].clone();
        self.push(InstKind::LoadVar(var), Vec::new(), ty)
    }

    /// Writes an address-exposed variable
    pub fn store_var(&mut self, var: VariableId, value: Value) -> InstId {
        self.push(InstKind::StoreVar(var), vec![value], SsaType::Void)
    }

    /// Address of a variable
    pub fn var_addr(&mut self, var: VariableId) -> InstId {
        let ty = SsaType::ByRef(Box::new(self.body.variables()[var.0].clone()));
        self.push(InstKind::VarAddr(var), Vec::new(), ty)
    }

    /// Address of an argument
    pub fn arg_addr(&mut self, index: u16) -> InstId {
        let ty = SsaType::ByRef(Box::new(self.body.value_type(&Value::Arg(index))));
        self.push(InstKind::ArgAddr(index), Vec::new(), ty)
    }

    /// `*address`
    pub fn load_indirect(&mut self, ty: SsaType, address: Value) -> InstId {
        self.push(InstKind::LoadIndirect(ty.clone()), vec![address], ty)
    }

    /// `*address = value`
    pub fn store_indirect(&mut self, ty: SsaType, address: Value, value: Value) -> InstId {
        self.push(
            InstKind::StoreIndirect(ty),
            vec![address, value],
            SsaType::Void,
        )
    }

    /// Phi node with the given incoming values
    pub fn phi(&mut self, ty: SsaType, args: &[(BlockId, Value)]) -> InstId {
        let preds = args.iter().map(|(b, _)| *b).collect();
        let operands = args.iter().map(|(_, v)| *v).collect();
        self.push(InstKind::Phi { preds }, operands, ty)
    }

    /// Opens a protected region at the current block.
    ///
    /// Guards on the same block share one try body, and their clauses are tried in the
    /// order they were added. Nested regions open at a block of their own.
    pub fn guard(&mut self, kind: GuardKind, handler: BlockId, filter: Option<BlockId>) -> InstId {
        let ty = if kind.pushes_exception() {
            SsaType::Object
        } else {
            SsaType::Void
        };
        self.push(
            InstKind::Guard {
                kind,
                handler,
                filter,
            },
            Vec::new(),
            ty,
        )
    }

    /// Unconditional jump
    pub fn jump(&mut self, target: BlockId) -> InstId {
        self.push(InstKind::Jump(target), Vec::new(), SsaType::Void)
    }

    /// Two-way branch on `condition`
    pub fn branch(&mut self, condition: Value, then_block: BlockId, else_block: BlockId) -> InstId {
        self.push(
            InstKind::Branch {
                then_block,
                else_block,
            },
            vec![condition],
            SsaType::Void,
        )
    }

    /// Jump table
    pub fn switch(&mut self, index: Value, targets: Vec<BlockId>, default: BlockId) -> InstId {
        self.push(
            InstKind::Switch { targets, default },
            vec![index],
            SsaType::Void,
        )
    }

    /// Method return
    pub fn ret(&mut self, value: Option<Value>) -> InstId {
        self.push(InstKind::Return, value.into_iter().collect(), SsaType::Void)
    }

    /// Throws `exception`
    pub fn throw(&mut self, exception: Value) -> InstId {
        self.push(InstKind::Throw, vec![exception], SsaType::Void)
    }

    /// Rethrows the current exception
    pub fn rethrow(&mut self) -> InstId {
        self.push(InstKind::Rethrow, Vec::new(), SsaType::Void)
    }

    /// Leaves the enclosing protected region(s)
    pub fn leave(&mut self, target: BlockId) -> InstId {
        self.push(InstKind::Leave(target), Vec::new(), SsaType::Void)
    }

    /// Ends a finally or fault handler
    pub fn end_finally(&mut self) -> InstId {
        self.push(InstKind::EndFinally, Vec::new(), SsaType::Void)
    }

    /// Ends a filter with the given verdict
    pub fn end_filter(&mut self, result: Value) -> InstId {
        self.push(InstKind::EndFilter, vec![result], SsaType::Void)
    }
}
