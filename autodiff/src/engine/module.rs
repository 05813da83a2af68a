//! Declarations the engine evaluates and differentiates: functions,
//! nominal types, classes, protocols, conformances and globals.

use super::ir::{Body, Callee, Type};
use super::value::{RuntimeError, Tangent, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

/// An opaque function implemented outside the IR.
pub type NativeFn = Rc<dyn Fn(&[Value]) -> Result<Value, RuntimeError>>;

/// Pullback of a registered derivative: one tangent per parameter.
pub type CustomPullback = Box<dyn Fn(Tangent) -> Result<Vec<Tangent>, RuntimeError>>;

/// Differential of a registered derivative: one tangent per parameter in.
pub type CustomDifferential = Box<dyn Fn(&[Tangent]) -> Result<Tangent, RuntimeError>>;

pub type VjpFn = Rc<dyn Fn(&[Value]) -> Result<(Value, CustomPullback), RuntimeError>>;
pub type JvpFn = Rc<dyn Fn(&[Value]) -> Result<(Value, CustomDifferential), RuntimeError>>;

/// A hand-written derivative that replaces derivation of a body.
#[derive(Clone)]
pub struct CustomDerivative {
    pub vjp: VjpFn,
    pub jvp: Option<JvpFn>,
}

impl CustomDerivative {
    pub fn from_vjp<P>(vjp: impl Fn(&[Value]) -> Result<(Value, P), RuntimeError> + 'static) -> Self
    where
        P: Fn(Tangent) -> Result<Vec<Tangent>, RuntimeError> + 'static,
    {
        Self {
            vjp: Rc::new(move |args: &[Value]| {
                let (value, pullback) = vjp(args)?;
                Ok((value, Box::new(pullback) as CustomPullback))
            }),
            jvp: None,
        }
    }

    pub fn with_jvp<D>(mut self, jvp: impl Fn(&[Value]) -> Result<(Value, D), RuntimeError> + 'static) -> Self
    where
        D: Fn(&[Tangent]) -> Result<Tangent, RuntimeError> + 'static,
    {
        self.jvp = Some(Rc::new(move |args: &[Value]| {
            let (value, differential) = jvp(args)?;
            Ok((value, Box::new(differential) as CustomDifferential))
        }));
        self
    }
}

impl fmt::Debug for CustomDerivative {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomDerivative")
            .field("jvp", &self.jvp.is_some())
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    pub name: String,
    pub ty: Type,
    /// `@nondiff`: never a differentiation argument.
    pub nondiff: bool,
}

#[derive(Clone)]
pub enum Implementation {
    Ir(Body),
    Native(NativeFn),
}

impl fmt::Debug for Implementation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Implementation::Ir(body) => f.debug_tuple("Ir").field(body).finish(),
            Implementation::Native(_) => f.write_str("Native"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FunctionDecl {
    pub name: String,
    pub params: Vec<Param>,
    pub result: Type,
    pub implementation: Implementation,
    pub derivative: Option<CustomDerivative>,
}

impl FunctionDecl {
    /// An opaque function of the given signature.
    pub fn native(
        name: impl Into<String>,
        params: Vec<Param>,
        result: Type,
        body: impl Fn(&[Value]) -> Result<Value, RuntimeError> + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            params,
            result,
            implementation: Implementation::Native(Rc::new(body)),
            derivative: None,
        }
    }

    pub fn with_derivative(mut self, derivative: CustomDerivative) -> Self {
        self.derivative = Some(derivative);
        self
    }
}

impl Param {
    pub fn new(name: impl Into<String>, ty: Type) -> Self {
        Self {
            name: name.into(),
            ty,
            nondiff: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDecl {
    pub name: String,
    pub ty: Type,
    /// `@noDerivative`: excluded from the tangent.
    pub no_derivative: bool,
}

impl FieldDecl {
    pub fn new(name: impl Into<String>, ty: Type) -> Self {
        Self {
            name: name.into(),
            ty,
            no_derivative: false,
        }
    }

    pub fn no_derivative(name: impl Into<String>, ty: Type) -> Self {
        Self {
            no_derivative: true,
            ..Self::new(name, ty)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructDecl {
    pub name: String,
    pub fields: Vec<FieldDecl>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumDecl {
    pub name: String,
    /// Case names with their payload types.
    pub cases: Vec<(String, Option<Type>)>,
}

/// A method slot of a class: the implementing function and whether the
/// member is `@differentiable`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodEntry {
    pub function: String,
    pub differentiable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassDecl {
    pub name: String,
    pub superclass: Option<String>,
    pub methods: BTreeMap<String, MethodEntry>,
}

impl ClassDecl {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            superclass: None,
            methods: BTreeMap::new(),
        }
    }

    pub fn inherits(mut self, superclass: impl Into<String>) -> Self {
        self.superclass = Some(superclass.into());
        self
    }

    pub fn method(mut self, name: impl Into<String>, function: impl Into<String>, differentiable: bool) -> Self {
        self.methods.insert(
            name.into(),
            MethodEntry {
                function: function.into(),
                differentiable,
            },
        );
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    pub differentiable: bool,
    /// Implementation used by conformances that do not witness it.
    pub default: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolDecl {
    pub name: String,
    pub requirements: BTreeMap<String, Requirement>,
}

impl ProtocolDecl {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            requirements: BTreeMap::new(),
        }
    }

    pub fn requirement(mut self, name: impl Into<String>, differentiable: bool, default: Option<&str>) -> Self {
        self.requirements.insert(
            name.into(),
            Requirement {
                differentiable,
                default: default.map(str::to_string),
            },
        );
        self
    }
}

/// A set of declarations.
#[derive(Debug, Clone, Default)]
pub struct Module {
    functions: BTreeMap<String, FunctionDecl>,
    structs: BTreeMap<String, StructDecl>,
    enums: BTreeMap<String, EnumDecl>,
    classes: BTreeMap<String, ClassDecl>,
    protocols: BTreeMap<String, ProtocolDecl>,
    /// (type, protocol) to requirement witnesses.
    conformances: BTreeMap<(String, String), BTreeMap<String, String>>,
    globals: BTreeMap<String, Value>,
}

impl Module {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a function.
    pub fn add_function(&mut self, decl: FunctionDecl) -> &mut Self {
        self.functions.insert(decl.name.clone(), decl);
        self
    }

    /// Registers a custom derivative for `function`.
    pub fn register_derivative(
        &mut self,
        function: &str,
        derivative: CustomDerivative,
    ) -> Result<&mut Self, RuntimeError> {
        let decl = self
            .functions
            .get_mut(function)
            .ok_or_else(|| RuntimeError::UnknownFunction(function.to_string()))?;
        decl.derivative = Some(derivative);
        Ok(self)
    }

    pub fn define_struct(&mut self, name: impl Into<String>, fields: Vec<FieldDecl>) -> &mut Self {
        let name = name.into();
        self.structs.insert(name.clone(), StructDecl { name, fields });
        self
    }

    pub fn define_enum(&mut self, name: impl Into<String>, cases: Vec<(String, Option<Type>)>) -> &mut Self {
        let name = name.into();
        self.enums.insert(name.clone(), EnumDecl { name, cases });
        self
    }

    pub fn define_class(&mut self, class: ClassDecl) -> &mut Self {
        self.classes.insert(class.name.clone(), class);
        self
    }

    pub fn define_protocol(&mut self, protocol: ProtocolDecl) -> &mut Self {
        self.protocols.insert(protocol.name.clone(), protocol);
        self
    }

    /// Declares that `ty` conforms to `protocol` with the given
    /// (requirement, function) witnesses.
    pub fn add_conformance(&mut self, ty: &str, protocol: &str, witnesses: &[(&str, &str)]) -> &mut Self {
        let witnesses = witnesses
            .iter()
            .map(|(requirement, function)| (requirement.to_string(), function.to_string()))
            .collect();
        self.conformances
            .insert((ty.to_string(), protocol.to_string()), witnesses);
        self
    }

    pub fn define_global(&mut self, name: impl Into<String>, value: Value) -> &mut Self {
        self.globals.insert(name.into(), value);
        self
    }

    pub fn function(&self, name: &str) -> Option<&FunctionDecl> {
        self.functions.get(name)
    }

    pub fn struct_decl(&self, name: &str) -> Option<&StructDecl> {
        self.structs.get(name)
    }

    pub fn enum_decl(&self, name: &str) -> Option<&EnumDecl> {
        self.enums.get(name)
    }

    pub fn class(&self, name: &str) -> Option<&ClassDecl> {
        self.classes.get(name)
    }

    pub fn protocol(&self, name: &str) -> Option<&ProtocolDecl> {
        self.protocols.get(name)
    }

    pub(crate) fn globals(&self) -> &BTreeMap<String, Value> {
        &self.globals
    }

    /// Whether values of `ty` have a tangent space.
    pub fn is_differentiable(&self, ty: &Type) -> bool {
        match ty {
            Type::Float => true,
            Type::Int | Type::Bool | Type::Unit | Type::Enum(_) | Type::Class(_) => false,
            Type::Tuple(elements) => elements.iter().all(|ty| self.is_differentiable(ty)),
            Type::Struct(name) => self.structs.get(name).map_or(false, |decl| {
                decl.fields
                    .iter()
                    .all(|field| field.no_derivative || self.is_differentiable(&field.ty))
            }),
            Type::Optional(inner) => self.is_differentiable(inner),
        }
    }

    /// The method entry `class` dispatches `method` to, walking up the
    /// superclass chain.
    pub fn resolve_method(&self, class: &str, method: &str) -> Option<&MethodEntry> {
        let mut current = self.classes.get(class);
        while let Some(decl) = current {
            if let Some(entry) = decl.methods.get(method) {
                return Some(entry);
            }
            current = decl.superclass.as_deref().and_then(|name| self.classes.get(name));
        }
        None
    }

    /// The entries `method` dispatches to for `class` and every subclass.
    pub fn overrides(&self, class: &str, method: &str) -> Vec<&MethodEntry> {
        self.classes
            .keys()
            .filter(|name| self.is_subclass(name, class))
            .filter_map(|name| self.resolve_method(name, method))
            .collect()
    }

    /// Whether `class` is `ancestor` or inherits from it.
    pub fn is_subclass(&self, class: &str, ancestor: &str) -> bool {
        let mut current = Some(class);
        while let Some(name) = current {
            if name == ancestor {
                return true;
            }
            current = self
                .classes
                .get(name)
                .and_then(|decl| decl.superclass.as_deref());
        }
        false
    }

    /// The function that witnesses `requirement` of `protocol` for `ty`,
    /// falling back to the protocol's default implementation.
    pub fn resolve_witness(&self, ty: &str, protocol: &str, requirement: &str) -> Option<&str> {
        self.conformances
            .get(&(ty.to_string(), protocol.to_string()))
            .and_then(|witnesses| witnesses.get(requirement))
            .map(String::as_str)
            .or_else(|| {
                self.protocols
                    .get(protocol)
                    .and_then(|decl| decl.requirements.get(requirement))
                    .and_then(|req| req.default.as_deref())
            })
    }

    /// Resolves a callee for a receiver value (the first argument).
    pub fn resolve(&self, callee: &Callee, receiver: Option<&Value>) -> Result<String, RuntimeError> {
        let not_found = || RuntimeError::NoImplementation {
            callee: callee.to_string(),
            receiver: receiver.map_or_else(|| "()".to_string(), Value::type_name),
        };
        match callee {
            Callee::Function(name) => Ok(name.clone()),
            Callee::Witness { protocol, requirement } => {
                let ty = receiver.ok_or_else(not_found)?.type_name();
                self.resolve_witness(&ty, protocol, requirement)
                    .map(str::to_string)
                    .ok_or_else(not_found)
            }
            Callee::Method { method, .. } => match receiver {
                Some(Value::Object { class }) => self
                    .resolve_method(class, method)
                    .map(|entry| entry.function.clone())
                    .ok_or_else(not_found),
                _ => Err(not_found()),
            },
        }
    }

    /// Every function a call to `callee` may reach at runtime.
    pub fn candidates(&self, callee: &Callee) -> Vec<String> {
        let mut found: Vec<String> = match callee {
            Callee::Function(name) => vec![name.clone()],
            Callee::Witness { protocol, requirement } => self
                .conformances
                .iter()
                .filter(|((_, p), _)| p == protocol)
                .filter_map(|(_, witnesses)| witnesses.get(requirement).cloned())
                .chain(
                    self.protocols
                        .get(protocol)
                        .and_then(|decl| decl.requirements.get(requirement))
                        .and_then(|req| req.default.clone()),
                )
                .collect(),
            Callee::Method { class, method } => self
                .overrides(class, method)
                .into_iter()
                .map(|entry| entry.function.clone())
                .collect(),
        };
        found.sort();
        found.dedup();
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hierarchy() -> Module {
        let mut module = Module::new();
        module
            .define_class(ClassDecl::new("Super").method("f", "Super.f", true))
            .define_class(ClassDecl::new("Sub").inherits("Super").method("f", "Sub.f", true))
            .define_class(ClassDecl::new("Leaf").inherits("Sub"));
        module
    }

    #[test]
    fn methods_resolve_to_the_most_derived_override() {
        let module = hierarchy();
        assert_eq!(module.resolve_method("Leaf", "f").unwrap().function, "Sub.f");
        assert_eq!(module.resolve_method("Super", "f").unwrap().function, "Super.f");
        assert!(module.resolve_method("Super", "g").is_none());
        let callee = Callee::Method {
            class: "Super".into(),
            method: "f".into(),
        };
        let receiver = Value::Object { class: "Leaf".into() };
        assert_eq!(module.resolve(&callee, Some(&receiver)).unwrap(), "Sub.f");
        assert_eq!(module.candidates(&callee), vec!["Sub.f".to_string(), "Super.f".to_string()]);
    }

    #[test]
    fn witnesses_fall_back_to_defaults() {
        let mut module = Module::new();
        module
            .define_protocol(ProtocolDecl::new("P").requirement("req", true, Some("P.default")))
            .add_conformance("A", "P", &[("req", "A.req")])
            .add_conformance("B", "P", &[]);
        assert_eq!(module.resolve_witness("A", "P", "req"), Some("A.req"));
        assert_eq!(module.resolve_witness("B", "P", "req"), Some("P.default"));
        let callee = Callee::Witness {
            protocol: "P".into(),
            requirement: "req".into(),
        };
        assert_eq!(module.candidates(&callee), vec!["A.req".to_string(), "P.default".to_string()]);
    }

    #[test]
    fn differentiability_of_types() {
        let mut module = Module::new();
        module.define_struct(
            "Dense",
            vec![
                FieldDecl::new("w1", Type::Float),
                FieldDecl::no_derivative("label", Type::Int),
            ],
        );
        assert!(module.is_differentiable(&Type::Struct("Dense".into())));
        assert!(module.is_differentiable(&Type::optional(Type::Float)));
        assert!(!module.is_differentiable(&Type::Tuple(vec![Type::Float, Type::Int])));
        assert!(!module.is_differentiable(&Type::Struct("Missing".into())));
    }

    #[test]
    fn registering_a_derivative_needs_the_function() {
        let mut module = Module::new();
        let err = module
            .register_derivative("nope", CustomDerivative::from_vjp(|_| Ok((Value::Unit, |_: Tangent| Ok(Vec::new())))))
            .map(|_| ())
            .unwrap_err();
        assert_eq!(err, RuntimeError::UnknownFunction("nope".into()));
    }
}
