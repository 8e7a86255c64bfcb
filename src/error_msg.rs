// Malformed errors
pub const END_EXPECTED: &str = "END opcode expected";
pub const FUNC_CODE_INCONSISTENT: &str = "function and code section have inconsistent lengths";
pub const DATA_COUNT_MISMATCH: &str = "data count and data section have inconsistent lengths";
pub const DATA_COUNT_REQUIRED: &str = "data count section required";
pub const INT_TOO_LARGE: &str = "integer too large";
pub const INT_TOO_LONG: &str = "integer representation too long";
pub const INVALID_MUTABILITY: &str = "malformed mutability";
pub const INVALID_SECTION_ID: &str = "malformed section id";
pub const INVALID_UTF8: &str = "malformed UTF-8 encoding";
pub const INVALID_VALUE_TYPE: &str = "malformed value type";
pub const INVALID_HEAP_TYPE: &str = "malformed heap type";
pub const INVALID_COMPOSITE_TYPE: &str = "malformed composite type";
pub const INVALID_LIMITS_FLAGS: &str = "malformed limits flags";
pub const INVALID_ELEM_KIND: &str = "malformed element kind";
pub const INVALID_ELEM_FLAGS: &str = "malformed elements segment kind";
pub const INVALID_DATA_FLAGS: &str = "malformed data segment kind";
pub const INVALID_TAG_ATTRIBUTE: &str = "malformed tag attribute";
pub const INVALID_CATCH_KIND: &str = "malformed catch clause";
pub const INVALID_TABLE_PREFIX: &str = "malformed table";
pub const INVALID_CASTS_FLAGS: &str = "malformed cast flags";
pub const JUNK_AFTER_LAST: &str = "unexpected content after last section";
pub const NO_MAGIC_HEADER: &str = "magic header not detected";
pub const MALFORMED_IMPORT_KIND: &str = "malformed import kind";
pub const MALFORMED_EXPORT_KIND: &str = "malformed export kind";
pub const SECTION_SIZE_MISMATCH: &str = "section size mismatch";
pub const TOO_MANY_LOCALS: &str = "too many locals";
pub const UNEXPECTED_END: &str = "unexpected end of section or function";
pub const UNEXPECTED_END_SHORT: &str = "unexpected end";
pub const UNKNOWN_BINARY_VERSION: &str = "unknown binary version";
pub const UNKNOWN_INSTRUCTION: &str = "illegal opcode";
pub const ZERO_BYTE_EXPECTED: &str = "zero byte expected";
pub const LENGTH_OUT_OF_BOUNDS: &str = "length out of bounds";
// Validation errors
pub const ALIGNMENT_TOO_LARGE: &str = "alignment must not be larger than natural";
pub const ALIGNMENT_NOT_NATURAL: &str = "alignment must be equal to natural";
pub const CONST_EXP_REQUIRED: &str = "constant expression required";
pub const DUP_EXPORT_NAME: &str = "duplicate export name";
pub const ELSE_MUST_CLOSE_IF: &str = "else must close an if";
pub const CATCH_MUST_CLOSE_TRY: &str = "catch must close a try";
pub const DELEGATE_MUST_CLOSE_TRY: &str = "delegate must close a try";
pub const RETHROW_NOT_IN_CATCH: &str = "rethrow target must be a catch block";
pub const GLOBAL_IS_IMMUTABLE: &str = "global is immutable";
pub const FIELD_IS_IMMUTABLE: &str = "field is immutable";
pub const ARRAY_IS_IMMUTABLE: &str = "array is immutable";
pub const INVALID_RESULT_ARITY: &str = "invalid result arity";
pub const INVALID_LANE_INDEX: &str = "invalid lane index";
pub const INVALID_TAG_TYPE: &str = "non-empty tag result type";
pub const MEMORY_SIZE_LIMIT: &str = "memory size must be at most 65536 pages (4GiB)";
pub const MEMORY64_SIZE_LIMIT: &str = "memory size must be at most 2^48 pages";
pub const TABLE_SIZE_LIMIT: &str = "table size must be at most 2^32-1";
pub const SHARED_MEMORY_NEEDS_MAX: &str = "shared memory must have maximum";
pub const MIN_GREATER_THAN_MAX: &str = "size minimum must not be greater than maximum";
pub const MULTIPLE_MEMORIES: &str = "multiple memories";
pub const MULTIPLE_TABLES: &str = "multiple tables";
pub const START_FUNC: &str = "start function";
pub const TYPE_MISMATCH: &str = "type mismatch";
pub const UNDECLARED_FUNC_REF: &str = "undeclared function reference";
pub const UNINITIALIZED_LOCAL: &str = "uninitialized local";
pub const UNINITIALIZED_TABLE: &str = "type mismatch: non-defaultable table element requires an initializer";
pub const UNKNOWN_DATA: &str = "unknown data segment";
pub const UNKNOWN_ELEM: &str = "unknown elem segment";
pub const UNKNOWN_FIELD: &str = "unknown field";
pub const UNKNOWN_FUNC: &str = "unknown function";
pub const UNKNOWN_GLOBAL: &str = "unknown global";
pub const UNKNOWN_LABEL: &str = "unknown label";
pub const UNKNOWN_LOCAL: &str = "unknown local";
pub const UNKNOWN_MEMORY: &str = "unknown memory";
pub const UNKNOWN_TABLE: &str = "unknown table";
pub const UNKNOWN_TAG: &str = "unknown tag";
pub const UNKNOWN_TYPE: &str = "unknown type";
pub const INVALID_SUPERTYPE: &str = "sub type does not match super type";
pub const FINAL_SUPERTYPE: &str = "sub type of a final type";
pub const TOO_MANY_SUPERTYPES: &str = "multiple supertypes";
pub const NOT_A_FUNC_TYPE: &str = "type is not a function type";
pub const NOT_A_STRUCT_TYPE: &str = "type is not a struct type";
pub const NOT_AN_ARRAY_TYPE: &str = "type is not an array type";
pub const PACKED_FIELD: &str = "packed storage type requires get_s or get_u";
pub const UNPACKED_FIELD: &str = "signed or unsigned access requires a packed storage type";
pub const NON_DEFAULTABLE: &str = "type is not defaultable";
// Limit errors
pub const MODULE_SIZE_LIMIT: &str = "module size exceeds limit";
pub const TYPE_COUNT_LIMIT: &str = "type count exceeds limit";
pub const FUNCTION_COUNT_LIMIT: &str = "function count exceeds limit";
pub const IMPORT_COUNT_LIMIT: &str = "import count exceeds limit";
pub const EXPORT_COUNT_LIMIT: &str = "export count exceeds limit";
pub const TABLE_COUNT_LIMIT: &str = "table count exceeds limit";
pub const MEMORY_COUNT_LIMIT: &str = "memory count exceeds limit";
pub const GLOBAL_COUNT_LIMIT: &str = "global count exceeds limit";
pub const DATA_SEGMENT_COUNT_LIMIT: &str = "data segment count exceeds limit";
pub const ELEMENT_SEGMENT_COUNT_LIMIT: &str = "element segment count exceeds limit";
pub const TAG_COUNT_LIMIT: &str = "tag count exceeds limit";
pub const FUNCTION_SIZE_LIMIT: &str = "function size exceeds limit";
pub const PARAM_COUNT_LIMIT: &str = "parameter count exceeds limit";
pub const RESULT_COUNT_LIMIT: &str = "result count exceeds limit";
pub const LOCAL_COUNT_LIMIT: &str = "local count exceeds limit";
pub const NESTING_DEPTH_LIMIT: &str = "control nesting depth exceeds limit";
pub const TABLE_SIZE_POLICY_LIMIT: &str = "initial table size exceeds limit";
pub const MEMORY_PAGES_POLICY_LIMIT: &str = "initial memory size exceeds limit";
pub const PARSE_THREAD_FAILED: &str = "parser thread failed";
// Link errors
pub const CYCLIC_DEPENDENCY: &str = "detected a cycle in the import dependencies";
pub const DUPLICATE_INSTANCE: &str = "instance name already registered";
pub const DUPLICATE_SYMBOL: &str = "symbol resolved more than once";
pub const INCOMPATIBLE_IMPORT: &str = "incompatible import type";
pub const LINK_PREVIOUSLY_FAILED: &str = "module linking previously failed";
pub const MODULE_NOT_FOUND: &str = "module does not exist";
pub const UNKNOWN_IMPORT: &str = "unknown import";
pub const HOST_ACTION_FAILED: &str = "link action failed";
