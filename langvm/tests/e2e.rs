//! End-to-end scenarios: source text in, `VMResult`/`Value` out, through
//! the full `pipeline::compile` -> `Vm` path. `print`/`printArray` write to
//! real stdout, so scenarios that need to inspect a result call the
//! function directly through `Vm::call_function` and read its return value
//! (or the heap, via the `array_*` test hooks) instead of capturing output.

use langvm::jit::JitConfig;
use langvm::value::Value;
use langvm::vm::error::VMResult;
use langvm::{pipeline, Vm};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::{Duration, Instant};

fn jit_disabled() -> JitConfig {
    JitConfig {
        enabled: false,
        threshold: u64::MAX,
        worker_count: 0,
    }
}

#[test]
fn factorial_of_twenty_does_not_overflow_i64() {
    let source = "
        fn factorial(int n) int {
            if (n <= 1) {
                return 1;
            }
            return n * factorial(n - 1);
        }
        fn main() void {
            print(factorial(20));
        }
    ";
    let module = pipeline::compile(source).expect("source compiles");
    let factorial = module.function_index_by_name("factorial").unwrap();
    let mut vm = Vm::with_config(Arc::new(module), jit_disabled());

    let result = vm.call_function(factorial, vec![Value::Int(20)]);
    assert_eq!(result, Ok(Value::Int(2_432_902_008_176_640_000)));
    assert_eq!(vm.heap_object_count(), 0);
}

#[test]
fn sieve_counts_the_primes_up_to_thirty() {
    // 2, 3, 5, 7, 11, 13, 17, 19, 23, 29 — ten primes at or below 30.
    let source = "
        fn countPrimes(int n) int {
            let bool[] isComposite = new bool[n + 1];
            let int count = 0;
            let int i;
            for (i = 2; i <= n; i = i + 1) {
                if (!isComposite[i]) {
                    count = count + 1;
                    let int j;
                    for (j = i * i; j <= n; j = j + i) {
                        isComposite[j] = true;
                    }
                }
            }
            return count;
        }
        fn main() void {
            print(countPrimes(30));
        }
    ";
    let module = pipeline::compile(source).expect("source compiles");
    let count_primes = module.function_index_by_name("countPrimes").unwrap();
    let mut vm = Vm::with_config(Arc::new(module), jit_disabled());

    let result = vm.call_function(count_primes, vec![Value::Int(30)]);
    assert_eq!(result, Ok(Value::Int(10)));
    assert_eq!(vm.heap_object_count(), 0);
}

#[test]
fn insertion_sort_orders_a_reversed_array() {
    let source = "
        fn insertionSort(int[] arr, int n) void {
            let int i;
            for (i = 1; i < n; i = i + 1) {
                let int key = arr[i];
                let int pos = i;
                let bool shifting = true;
                let int j = i - 1;
                for (; j >= 0 && shifting; j = j - 1) {
                    if (arr[j] > key) {
                        arr[j + 1] = arr[j];
                        pos = j;
                    } else {
                        shifting = false;
                    }
                }
                arr[pos] = key;
            }
        }
        fn buildAndSort(int n) int[] {
            let int[] arr = new int[n];
            let int i;
            for (i = 0; i < n; i = i + 1) {
                arr[i] = n - i + 99;
            }
            insertionSort(arr, n);
            return arr;
        }
        fn main() void {
            printArray(buildAndSort(30));
        }
    ";
    let module = pipeline::compile(source).expect("source compiles");
    let build_and_sort = module.function_index_by_name("buildAndSort").unwrap();
    let mut vm = Vm::with_config(Arc::new(module), jit_disabled());

    let result = vm
        .call_function(build_and_sort, vec![Value::Int(30)])
        .expect("sort succeeds");
    assert_eq!(vm.array_len(result), Ok(30));
    assert_eq!(vm.array_element_int(result, 0), Ok(100));
    assert_eq!(vm.array_element_int(result, 1), Ok(101));
    assert_eq!(vm.array_element_int(result, 2), Ok(102));
    assert_eq!(vm.array_element_int(result, 29), Ok(129));
    assert_eq!(vm.heap_object_count(), 1);
    vm.release_array(result).expect("array still live");
    assert_eq!(vm.heap_object_count(), 0);
}

#[test]
fn division_by_zero_surfaces_as_a_vm_result() {
    let source = "
        fn main() void {
            let int x = 10 / 0;
        }
    ";
    let module = pipeline::compile(source).expect("source compiles");
    let mut vm = Vm::with_config(Arc::new(module), jit_disabled());
    assert_eq!(vm.run(), VMResult::DivisionByZero);
}

#[test]
fn array_index_out_of_bounds_surfaces_as_a_vm_result() {
    let source = "
        fn main() void {
            let int[] a = new int[3];
            let int x = a[3];
        }
    ";
    let module = pipeline::compile(source).expect("source compiles");
    let mut vm = Vm::with_config(Arc::new(module), jit_disabled());
    assert_eq!(vm.run(), VMResult::ArrayIndexOutOfBounds);
}

#[test]
fn hot_function_eventually_runs_through_the_jit_and_agrees_with_the_interpreter() {
    let source = "
        fn addOne(int x) int {
            return x + 1;
        }
        fn sumLoop(int n) int {
            let int total = 0;
            let int i;
            for (i = 0; i < n; i = i + 1) {
                total = addOne(total);
            }
            return total;
        }
        fn main() void {
            print(sumLoop(10));
        }
    ";
    let module = pipeline::compile(source).expect("source compiles");
    let sum_loop = module.function_index_by_name("sumLoop").unwrap();
    let add_one = module.function_index_by_name("addOne").unwrap();
    let module = Arc::new(module);

    let mut vm_interp = Vm::with_config(Arc::clone(&module), jit_disabled());
    let interpreted = vm_interp
        .call_function(sum_loop, vec![Value::Int(2000)])
        .expect("interpreted run succeeds");
    assert_eq!(interpreted, Value::Int(2000));

    let mut vm_jit = Vm::with_config(
        module,
        JitConfig {
            enabled: true,
            threshold: 50,
            worker_count: 2,
        },
    );
    let mixed = vm_jit
        .call_function(sum_loop, vec![Value::Int(2000)])
        .expect("mixed-mode run succeeds");
    assert_eq!(mixed, interpreted, "JIT and interpreter must agree");

    let deadline = Instant::now() + Duration::from_secs(2);
    while !vm_jit.is_compiled(add_one) && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
    }
    assert!(
        vm_jit.is_compiled(add_one),
        "background scheduler never published a native executor for addOne"
    );
    let direct = vm_jit
        .call_function(add_one, vec![Value::Int(41)])
        .expect("compiled addOne still callable directly");
    assert_eq!(direct, Value::Int(42));
}
